//! Infrastructure Layer - Storage, queue and notifier implementations

pub mod memory;
pub mod notify;
pub mod postgres;
pub mod queue;
