//! Domain Value Objects
//!
//! Immutable value types for the metering domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::{MeteringError, MeteringResult};

/// Upper bound for caller-supplied identifiers
pub const MAX_FIELD_LEN: usize = 255;

/// Namespace of a rate-limit key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    Account,
    Ip,
}

impl KeyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Account => "account",
            KeyKind::Ip => "ip",
        }
    }
}

impl FromStr for KeyKind {
    type Err = MeteringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "account" => Ok(KeyKind::Account),
            "ip" => Ok(KeyKind::Ip),
            other => Err(MeteringError::InvalidInput(format!(
                "unknown key kind: {other}"
            ))),
        }
    }
}

/// Opaque identifier of a rate-limited principal, rendered `kind:value`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    kind: KeyKind,
    value: String,
}

impl RateLimitKey {
    pub fn new(kind: KeyKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn account(account_id: impl Into<String>) -> Self {
        Self::new(KeyKind::Account, account_id)
    }

    pub fn ip(ip: IpAddr) -> Self {
        Self::new(KeyKind::Ip, ip.to_string())
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.value)
    }
}

impl FromStr for RateLimitKey {
    type Err = MeteringError;

    // Splits on the first ':' only, so IPv6 values survive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s
            .split_once(':')
            .ok_or_else(|| MeteringError::InvalidInput(format!("malformed key: {s}")))?;
        if value.is_empty() {
            return Err(MeteringError::InvalidInput(format!("malformed key: {s}")));
        }
        Ok(Self::new(kind.parse()?, value))
    }
}

/// Trimmed, non-empty, bounded string field
fn validate_field(field: &'static str, raw: &str) -> MeteringResult<String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(MeteringError::InvalidInput(format!("{field} is required")));
    }
    if value.chars().count() > MAX_FIELD_LEN {
        return Err(MeteringError::InvalidInput(format!(
            "{field} must be at most {MAX_FIELD_LEN} characters"
        )));
    }
    Ok(value.to_string())
}

/// Account identifier supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountId(String);

impl AccountId {
    pub fn parse(raw: &str) -> MeteringResult<Self> {
        validate_field("accountId", raw).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Metered endpoint name supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn parse(raw: &str) -> MeteringResult<Self> {
        validate_field("endpoint", raw).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What a queue message asks the alert coordinator to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Alert,
    Recovery,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Alert => "alert",
            MessageKind::Recovery => "recovery",
        }
    }
}

/// Event carried by the in-process queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub topic: String,
    pub key: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
}

impl QueueMessage {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn alert(topic: impl Into<String>, key: &RateLimitKey) -> Self {
        Self::new(topic, key.to_string(), MessageKind::Alert)
    }

    pub fn recovery(topic: impl Into<String>, key: &RateLimitKey) -> Self {
        Self::new(topic, key.to_string(), MessageKind::Recovery)
    }
}
