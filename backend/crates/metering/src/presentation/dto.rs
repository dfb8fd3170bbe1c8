//! API DTOs (Data Transfer Objects)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request for POST /api/v1/usage
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUsageRequest {
    pub account_id: String,
    pub endpoint: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Response for POST /api/v1/usage
#[derive(Debug, Clone, Serialize)]
pub struct CreateUsageResponse {
    pub status: &'static str,
}

impl CreateUsageResponse {
    pub fn success() -> Self {
        Self { status: "success" }
    }
}

/// Response for GET /api/v1/health
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub rate_limit_strategy: &'static str,
    pub queue_active: bool,
}
