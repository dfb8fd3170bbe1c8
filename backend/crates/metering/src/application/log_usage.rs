//! Log Usage Use Case

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::domain::entities::Usage;
use crate::domain::repository::UsageRepository;
use crate::domain::value_objects::{AccountId, Endpoint};
use crate::error::MeteringResult;

/// Input DTO for log usage
#[derive(Debug, Clone)]
pub struct LogUsageInput {
    pub account_id: AccountId,
    pub endpoint: Endpoint,
    /// Caller-supplied time; the server clock is used when absent
    pub timestamp: Option<DateTime<Utc>>,
}

/// Log Usage Use Case
pub struct LogUsageUseCase<U>
where
    U: UsageRepository,
{
    usage_repo: Arc<U>,
}

impl<U> LogUsageUseCase<U>
where
    U: UsageRepository,
{
    pub fn new(usage_repo: Arc<U>) -> Self {
        Self { usage_repo }
    }

    pub async fn execute(&self, input: LogUsageInput) -> MeteringResult<Usage> {
        let usage = Usage::new(
            &input.account_id,
            &input.endpoint,
            input.timestamp.unwrap_or_else(Utc::now),
        );

        self.usage_repo.record(&usage).await?;

        tracing::info!(
            request_id = %usage.id,
            account_id = %usage.account_id,
            endpoint = %usage.endpoint,
            "Logged API usage"
        );

        Ok(usage)
    }
}
