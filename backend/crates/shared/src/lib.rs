//! Shared Kernel - Domain-crossing minimal core
//!
//! This crate contains the smallest shared vocabulary:
//! - The unified [`error::app_error::AppError`] and its [`error::kind::ErrorKind`]
//! - Typed ID wrappers used by domain entities
//!
//! Only things with one consistent meaning across every crate belong here.

pub mod error {
    pub mod app_error;
    pub mod conversions;
    pub mod kind;
}
pub mod id;
