use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use nearme_auth::{NewSession, NewUser, Session, SessionStats, User};
use nearme_core::{DomainError, UserId};

/// Column carrying a uniqueness constraint.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UniqueField {
    Email,
    Username,
    ExternalId,
    SessionToken,
}

impl UniqueField {
    pub fn as_str(&self) -> &'static str {
        match self {
            UniqueField::Email => "email",
            UniqueField::Username => "username",
            UniqueField::ExternalId => "external_id",
            UniqueField::SessionToken => "session_token",
        }
    }
}

impl core::fmt::Display for UniqueField {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage operation error.
///
/// `Conflict` and `NotFound` are expected outcomes the caller reacts to;
/// `Invalid` and `Backend` are faults.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("unique constraint violated on {0}")]
    Conflict(UniqueField),

    #[error("record not found")]
    NotFound,

    #[error("record rejected: {0}")]
    Invalid(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<DomainError> for StoreError {
    fn from(err: DomainError) -> Self {
        StoreError::Invalid(err.to_string())
    }
}

/// Account counts for the admin dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UserStats {
    pub total_users: u64,
    pub active_users: u64,
    pub inactive_users: u64,
    pub admin_users: u64,
    pub regular_users: u64,
    pub oauth_users: u64,
    pub password_users: u64,
}

/// Persistent user accounts (the credential store).
///
/// Implementations enforce uniqueness of `email`, `username` and `external_id`
/// and re-check the credential invariant on every write.
#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, new: NewUser, now: DateTime<Utc>) -> Result<User, StoreError>;

    async fn get(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Lookup by email; the argument is normalized before comparison.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<User>, StoreError>;

    async fn username_taken(&self, username: &str) -> Result<bool, StoreError>;

    /// Overwrite every mutable column of an existing account.
    async fn update(&self, user: &User) -> Result<User, StoreError>;

    /// Page through accounts in creation order.
    async fn list(&self, offset: u64, limit: u64) -> Result<Vec<User>, StoreError>;

    async fn stats(&self) -> Result<UserStats, StoreError>;

    /// Remove an account together with all of its sessions.
    async fn delete(&self, id: UserId) -> Result<bool, StoreError>;
}

/// Persistent login sessions.
///
/// Expiry is lazy: reads filter on `expires_at` but never delete. Rows go away
/// only through revocation, a sweep, a purge or a cascading user delete.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, new: NewSession, now: DateTime<Utc>) -> Result<Session, StoreError>;

    /// The session for `token` if it is still active at `now`.
    async fn find_active(&self, token: &str, now: DateTime<Utc>)
    -> Result<Option<Session>, StoreError>;

    /// Delete one session by token.
    async fn revoke(&self, token: &str) -> Result<bool, StoreError>;

    /// Delete every session of one user.
    async fn revoke_all(&self, user_id: UserId) -> Result<u64, StoreError>;

    /// Delete sessions with `expires_at <= now`, optionally for one user only.
    async fn sweep_expired(
        &self,
        user_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn extend(
        &self,
        token: &str,
        new_expiry: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError>;

    /// Newest first.
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Session>, StoreError>;

    async fn stats(
        &self,
        user_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<SessionStats, StoreError>;

    /// Delete sessions created before `cutoff`, expired or not.
    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
