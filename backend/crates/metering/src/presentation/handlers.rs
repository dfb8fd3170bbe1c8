//! HTTP Handlers

use crate::application::admission::{AdmissionDecision, AdmissionService, CounterStrategy};
use crate::application::log_usage::{LogUsageInput, LogUsageUseCase};
use crate::domain::repository::{RequestLogRepository, UsageRepository};
use crate::domain::value_objects::{AccountId, Endpoint, RateLimitKey};
use crate::error::{MeteringError, MeteringResult};
use crate::infra::queue::InMemoryQueue;
use crate::presentation::dto::{CreateUsageRequest, CreateUsageResponse, HealthResponse};
use axum::Json;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use platform::client::extract_client_ip;
use std::net::SocketAddr;
use std::sync::Arc;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Shared state for metering handlers
pub struct MeteringAppState<R>
where
    R: UsageRepository + RequestLogRepository + Send + Sync + 'static,
{
    pub repo: Arc<R>,
    pub admission: Arc<AdmissionService<CounterStrategy<R>>>,
    pub queue: InMemoryQueue,
}

// Manual impl: a derive would demand `R: Clone`.
impl<R> Clone for MeteringAppState<R>
where
    R: UsageRepository + RequestLogRepository + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            admission: Arc::clone(&self.admission),
            queue: self.queue.clone(),
        }
    }
}

/// POST /api/v1/usage
///
/// Checks the client IP, then the account. The first denial answers 429;
/// an admitted request is recorded and answered 201.
pub async fn create_usage<R>(
    State(state): State<MeteringAppState<R>>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<CreateUsageRequest>,
) -> MeteringResult<Response>
where
    R: UsageRepository + RequestLogRepository + Send + Sync + 'static,
{
    let account_id = AccountId::parse(&req.account_id)?;
    let endpoint = Endpoint::parse(&req.endpoint)?;

    let mut keys = Vec::with_capacity(2);
    if let Some(ip) = extract_client_ip(&headers, Some(addr.ip())) {
        keys.push(RateLimitKey::ip(ip));
    }
    keys.push(RateLimitKey::account(account_id.as_str()));

    let decision = state.admission.admit_all(&keys).await?;

    if !decision.allowed() {
        let retry_after_secs = decision.result.retry_after_secs(Utc::now());
        let mut response = MeteringError::RateLimitExceeded {
            key: decision.key.to_string(),
            retry_after_secs,
        }
        .into_response();
        apply_rate_limit_headers(response.headers_mut(), &decision);
        return Ok(response);
    }

    let use_case = LogUsageUseCase::new(state.repo.clone());
    use_case
        .execute(LogUsageInput {
            account_id,
            endpoint,
            timestamp: req.timestamp,
        })
        .await?;

    let mut response = (StatusCode::CREATED, Json(CreateUsageResponse::success())).into_response();
    apply_rate_limit_headers(response.headers_mut(), &decision);
    Ok(response)
}

/// GET /api/v1/health
pub async fn health<R>(State(state): State<MeteringAppState<R>>) -> Json<HealthResponse>
where
    R: UsageRepository + RequestLogRepository + Send + Sync + 'static,
{
    Json(HealthResponse {
        status: "ok",
        rate_limit_strategy: state.admission.counter().name(),
        queue_active: state.queue.is_active(),
    })
}

// X-RateLimit-Reset is the window end as unix seconds.
fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &AdmissionDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(
        X_RATELIMIT_REMAINING,
        HeaderValue::from(decision.result.remaining),
    );
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(decision.result.reset_at.timestamp()),
    );
}
