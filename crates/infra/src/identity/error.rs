use thiserror::Error;

use nearme_auth::{AuthzError, PasswordError, TokenError};
use nearme_core::DomainError;

use crate::oauth::ProviderError;
use crate::store::{StoreError, UniqueField};

/// Outcome taxonomy for every authentication and account operation.
///
/// The HTTP layer maps each variant to one status code; `Store` and
/// `Internal` carry details for logs only.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("could not validate credentials")]
    Unauthenticated,

    #[error("incorrect email or password")]
    InvalidCredentials,

    #[error(transparent)]
    Forbidden(#[from] AuthzError),

    #[error("invalid csrf token")]
    InvalidCsrf,

    #[error("{0} already taken")]
    Conflict(UniqueField),

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error("no free username could be derived")]
    UsernameExhausted,

    #[error("identity provider error: {0}")]
    Provider(String),

    #[error("store failure: {0}")]
    Store(StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(field) => AuthError::Conflict(field),
            StoreError::NotFound => AuthError::NotFound,
            other => AuthError::Store(other),
        }
    }
}

impl From<DomainError> for AuthError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => AuthError::Validation(msg),
            other => AuthError::Internal(other.to_string()),
        }
    }
}

impl From<PasswordError> for AuthError {
    fn from(err: PasswordError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

impl From<ProviderError> for AuthError {
    fn from(err: ProviderError) -> Self {
        AuthError::Provider(err.to_string())
    }
}
