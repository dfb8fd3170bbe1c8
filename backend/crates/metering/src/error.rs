//! Metering Error Types
//!
//! Metering-specific error variants that integrate with the unified
//! `kernel::error::AppError` system.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kernel::error::{app_error::AppError, kind::ErrorKind};
use thiserror::Error;

pub type MeteringResult<T> = Result<T, MeteringError>;

/// Boxed cause of a failed admission check
pub type StorageCause = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum MeteringError {
    /// Admission denied for a key; carries the `Retry-After` hint
    #[error("Rate limit exceeded for {key}")]
    RateLimitExceeded { key: String, retry_after_secs: u64 },

    /// The persisted counter could not decide; the caller fails closed
    #[error("Admission storage failure: {0}")]
    AdmissionStorage(#[source] StorageCause),

    /// A second active alert for the same key was about to be stored
    #[error("Active alert already exists for {0}")]
    DuplicateActiveAlert(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MeteringError {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.kind().status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MeteringError::RateLimitExceeded { .. } => ErrorKind::TooManyRequests,
            MeteringError::AdmissionStorage(_) => ErrorKind::ServiceUnavailable,
            MeteringError::DuplicateActiveAlert(_) => ErrorKind::Conflict,
            MeteringError::Notification(_) => ErrorKind::BadGateway,
            MeteringError::InvalidInput(_) => ErrorKind::BadRequest,
            MeteringError::Database(_) | MeteringError::Config(_) | MeteringError::Internal(_) => {
                ErrorKind::InternalServerError
            }
        }
    }

    fn log(&self) {
        match self {
            MeteringError::RateLimitExceeded {
                key,
                retry_after_secs,
            } => {
                tracing::info!(key = %key, retry_after_secs, "Rate limit exceeded");
            }
            MeteringError::InvalidInput(msg) => {
                tracing::debug!(message = %msg, "Rejected metering request");
            }
            MeteringError::DuplicateActiveAlert(key) => {
                tracing::warn!(key = %key, "Duplicate active alert rejected by store");
            }
            _ => {
                tracing::error!(error = %self, "Metering error");
            }
        }
    }
}

impl From<MeteringError> for AppError {
    fn from(err: MeteringError) -> Self {
        // Postgres failures keep the kernel's SQLSTATE mapping.
        let err = match err {
            MeteringError::Database(db) => return AppError::from(db),
            other => other,
        };
        let kind = err.kind();
        let retry_after = match &err {
            MeteringError::RateLimitExceeded {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        };
        // Server-side details stay in the logs.
        let message = if kind.is_server_error() {
            kind.as_str().to_string()
        } else {
            err.to_string()
        };
        let app_err = AppError::new(kind, message).with_source(err);
        match retry_after {
            Some(secs) => app_err.with_retry_after(secs),
            None => app_err,
        }
    }
}

impl From<platform::slack::SlackError> for MeteringError {
    fn from(err: platform::slack::SlackError) -> Self {
        MeteringError::Notification(err.to_string())
    }
}

impl From<platform::rate_limit::RateLimitConfigError> for MeteringError {
    fn from(err: platform::rate_limit::RateLimitConfigError) -> Self {
        MeteringError::Config(err.to_string())
    }
}

impl IntoResponse for MeteringError {
    fn into_response(self) -> Response {
        self.log();
        AppError::from(self).into_response()
    }
}
