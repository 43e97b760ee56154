//! Authentication services over the stores: identity resolution, password
//! accounts, administration and the OAuth bridge.

pub mod accounts;
pub mod admin;
pub mod error;
pub mod oauth_bridge;
pub mod resolver;

pub use accounts::{AccountService, IssuedCredentials, ProfileUpdate, Registration, Renewal};
pub use admin::{AdminService, MAX_PAGE_SIZE, MAX_PURGE_AGE_DAYS};
pub use error::AuthError;
pub use oauth_bridge::OAuthBridge;
pub use resolver::{Credentials, IdentityResolver};
