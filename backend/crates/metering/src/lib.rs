//! Metering Backend Module
//!
//! Per-key request admission, the in-process event queue and the alert
//! lifecycle that reacts to rate-limit breaches.
//!
//! Clean Architecture structure:
//! - `domain/` - Entities, keys, queue messages, repository and notifier traits
//! - `application/` - Admission, alert coordination and usage logging use cases
//! - `infra/` - Postgres and in-memory stores, the event queue, notifiers
//! - `presentation/` - HTTP handlers
//!
//! ## Guarantees
//! - Admission decisions for one key are linearizable
//! - At most one active alert exists per key
//! - Breach and recovery events are processed in push order per topic

pub mod application;
pub mod domain;
pub mod error;
pub mod infra;
pub mod presentation;

// Re-exports for convenience
pub use application::admission::{AdmissionService, CounterStrategy};
pub use application::alert_coordinator::AlertCoordinator;
pub use application::config::MeteringConfig;
pub use error::{MeteringError, MeteringResult};
pub use infra::postgres::PgMeteringRepository;
pub use infra::queue::InMemoryQueue;
pub use presentation::router::metering_router;

// Re-export kernel error types for unified error handling
pub use kernel::error::{app_error::AppError, kind::ErrorKind};
