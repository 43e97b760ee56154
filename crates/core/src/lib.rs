//! Identifiers and the domain error model shared by every crate.
//!
//! This crate has no knowledge of HTTP, storage or cryptography.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{SessionId, UserId};
