//! Domain Entities
//!
//! Core business entities for the metering domain.

use chrono::{DateTime, Utc};
use kernel::id::{AlertId, UsageId};
use std::fmt;
use std::str::FromStr;

use crate::domain::value_objects::{AccountId, Endpoint};
use crate::error::MeteringError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertStatus {
    Active,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = MeteringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AlertStatus::Active),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(MeteringError::Internal(format!(
                "unknown alert status: {other}"
            ))),
        }
    }
}

/// AlertRecord entity - one notification raised for a breached key
///
/// Records are never deleted; a resolved record stays as history and a later
/// breach creates a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRecord {
    pub id: AlertId,
    pub key: String,
    /// Handle the notifier returned when the alert was sent
    pub external_message_id: String,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertRecord {
    /// Create a new active alert
    pub fn new_active(key: impl Into<String>, external_message_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: AlertId::new(),
            key: key.into(),
            external_message_id: external_message_id.into(),
            status: AlertStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }

    /// Mark the alert resolved at `at`
    pub fn resolve(&mut self, at: DateTime<Utc>) {
        self.status = AlertStatus::Resolved;
        self.updated_at = at;
    }
}

/// Usage entity - one admitted, metered API request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Usage {
    pub id: UsageId,
    pub account_id: String,
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
}

impl Usage {
    pub fn new(account_id: &AccountId, endpoint: &Endpoint, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: UsageId::new(),
            account_id: account_id.as_str().to_string(),
            endpoint: endpoint.as_str().to_string(),
            timestamp,
        }
    }
}
