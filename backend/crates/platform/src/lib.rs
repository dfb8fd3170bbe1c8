//! Platform Crate - Technical Infrastructure
//!
//! This crate provides shared technical foundations:
//! - Rate limit configuration and the volatile fixed-window counter
//! - Client IP resolution from proxy headers
//! - Slack Web API client used for alert notifications

pub mod client;
pub mod rate_limit;
pub mod slack;
