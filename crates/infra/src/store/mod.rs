//! Credential and session persistence boundary.
//!
//! Services depend on the traits only; the backend is picked once at startup.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use r#trait::{SessionStore, StoreError, UniqueField, UserStats, UserStore};
