//! Application Layer - Use Cases
//!
//! This layer orchestrates domain logic and infrastructure.
//! Contains use case implementations.

pub mod admission;
pub mod alert_coordinator;
pub mod config;
pub mod log_usage;
