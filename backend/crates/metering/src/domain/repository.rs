//! Repository Traits
//!
//! Interfaces for data persistence. Implementation is in infrastructure layer.

use chrono::{DateTime, Utc};

use crate::domain::entities::{AlertRecord, Usage};
use crate::domain::value_objects::RateLimitKey;
use crate::error::MeteringResult;

/// Alert repository trait
#[trait_variant::make(AlertRepository: Send)]
pub trait LocalAlertRepository {
    /// Store a new active alert for `key`
    ///
    /// Fails with `DuplicateActiveAlert` if one is already active.
    async fn create_alert(&self, key: &str, external_message_id: &str)
    -> MeteringResult<AlertRecord>;

    /// Whether an active alert exists for `key`
    async fn is_active(&self, key: &str) -> MeteringResult<bool>;

    /// Atomically flip the active alert for `key` to resolved and return it
    async fn resolve_active(&self, key: &str) -> MeteringResult<Option<AlertRecord>>;
}

/// Usage repository trait
#[trait_variant::make(UsageRepository: Send)]
pub trait LocalUsageRepository {
    /// Persist one admitted request
    async fn record(&self, usage: &Usage) -> MeteringResult<()>;
}

/// Outcome of one sliding-window admission step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Requests inside the window before this one
    pub count: u32,
    /// Whether this request was recorded (i.e. admitted)
    pub inserted: bool,
    /// Oldest timestamp still inside the window, including this request
    pub oldest: Option<DateTime<Utc>>,
}

/// Request log repository trait (sliding window storage)
#[trait_variant::make(RequestLogRepository: Send)]
pub trait LocalRequestLogRepository {
    /// Prune entries older than `window_start`, count the rest, and record
    /// `now` if the count is below `limit`. All of it is one atomic step per key.
    async fn count_and_insert(
        &self,
        key: &RateLimitKey,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: u32,
    ) -> MeteringResult<WindowCount>;

    /// Forget every recorded request for `key`
    async fn clear(&self, key: &RateLimitKey) -> MeteringResult<()>;
}
