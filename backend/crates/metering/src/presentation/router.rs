//! Metering Router

use crate::application::admission::{AdmissionService, CounterStrategy};
use crate::domain::repository::{RequestLogRepository, UsageRepository};
use crate::infra::queue::InMemoryQueue;
use crate::presentation::handlers::{self, MeteringAppState};
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

/// Create the metering router for any repository implementation
pub fn metering_router<R>(
    repo: Arc<R>,
    admission: Arc<AdmissionService<CounterStrategy<R>>>,
    queue: InMemoryQueue,
) -> Router
where
    R: UsageRepository + RequestLogRepository + Send + Sync + 'static,
{
    let state = MeteringAppState {
        repo,
        admission,
        queue,
    };

    Router::new()
        .route("/usage", post(handlers::create_usage::<R>))
        .route("/health", get(handlers::health::<R>))
        .with_state(state)
}
