//! Infrastructure layer: persistence, authentication services, configuration
//! and the external identity provider.

pub mod config;
pub mod identity;
pub mod oauth;
pub mod store;
