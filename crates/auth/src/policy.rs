//! Access policy: role gating and account state checks.
//!
//! Pure functions over an already-loaded [`User`]. Enforcement happens at the
//! request boundary; storage never consults the policy.

use serde::Serialize;
use thiserror::Error;

use crate::{Role, User};

/// Message returned for every role refusal, whatever the role involved.
pub const INSUFFICIENT_ROLE_MESSAGE: &str = "not enough permissions";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthzError {
    #[error("not enough permissions")]
    InsufficientRole,

    #[error("inactive user")]
    InactiveAccount,
}

/// Require `required` exactly. Roles are flat: an admin does not implicitly
/// hold `user`, and nothing outranks `admin`.
pub fn authorize(user: &User, required: Role) -> Result<(), AuthzError> {
    if user.role == required {
        Ok(())
    } else {
        Err(AuthzError::InsufficientRole)
    }
}

pub fn ensure_active(user: &User) -> Result<(), AuthzError> {
    if user.is_active {
        Ok(())
    } else {
        Err(AuthzError::InactiveAccount)
    }
}
