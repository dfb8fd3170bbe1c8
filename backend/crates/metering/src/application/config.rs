//! Application Configuration
//!
//! Configuration for the metering application layer.

use std::str::FromStr;
use std::time::Duration;

use platform::rate_limit::RateLimitConfig;

use crate::domain::value_objects::KeyKind;
use crate::error::MeteringError;

/// Topic alert and recovery events travel on
pub const DEFAULT_ALERT_TOPIC: &str = "rate-limit-alerts";

/// Which counter backs admission decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CounterKind {
    /// Volatile fixed window, per process
    #[default]
    Memory,
    /// Transactional sliding window in Postgres, shared across instances
    Postgres,
}

impl FromStr for CounterKind {
    type Err = MeteringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(CounterKind::Memory),
            "postgres" => Ok(CounterKind::Postgres),
            other => Err(MeteringError::Config(format!(
                "unknown rate limit strategy: {other}"
            ))),
        }
    }
}

/// Which notifier receives alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifierKind {
    #[default]
    Console,
    Slack,
}

impl FromStr for NotifierKind {
    type Err = MeteringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(NotifierKind::Console),
            "slack" => Ok(NotifierKind::Slack),
            other => Err(MeteringError::Config(format!("unknown notifier: {other}"))),
        }
    }
}

/// Limits per key namespace
#[derive(Debug, Clone, Copy)]
pub struct LimitTable {
    pub account: RateLimitConfig,
    pub ip: RateLimitConfig,
}

impl Default for LimitTable {
    fn default() -> Self {
        Self {
            account: RateLimitConfig::default(),
            ip: RateLimitConfig::with_window(1000, Duration::from_secs(60))
                .unwrap_or_default(),
        }
    }
}

impl LimitTable {
    pub fn for_kind(&self, kind: KeyKind) -> &RateLimitConfig {
        match kind {
            KeyKind::Account => &self.account,
            KeyKind::Ip => &self.ip,
        }
    }

    /// Longest window across namespaces
    pub fn longest_window(&self) -> Duration {
        self.account.window().max(self.ip.window())
    }
}

/// Metering application configuration
#[derive(Debug, Clone)]
pub struct MeteringConfig {
    pub limits: LimitTable,
    pub counter: CounterKind,
    /// Deny (503) instead of admitting when the counter store fails
    pub fail_closed: bool,
    pub alert_topic: String,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            limits: LimitTable::default(),
            counter: CounterKind::Memory,
            fail_closed: true,
            alert_topic: DEFAULT_ALERT_TOPIC.to_string(),
        }
    }
}

impl MeteringConfig {
    /// Create config for development (tight account limit, easy to trip)
    pub fn development() -> Self {
        Self {
            limits: LimitTable {
                account: RateLimitConfig::with_window(5, Duration::from_secs(10))
                    .unwrap_or_default(),
                ..LimitTable::default()
            },
            ..Self::default()
        }
    }
}
