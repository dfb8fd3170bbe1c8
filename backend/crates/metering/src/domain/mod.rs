//! Domain Layer - Business logic and entities
//!
//! This layer contains:
//! - Domain entities (AlertRecord, Usage)
//! - Domain value objects (RateLimitKey, QueueMessage, validated request fields)
//! - Domain services (Notifier and alert texts)
//! - Repository traits (interfaces)

pub mod entities;
pub mod repository;
pub mod services;
pub mod value_objects;
