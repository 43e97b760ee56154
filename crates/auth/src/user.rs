//! User account record (the principal) and its construction rules.
//!
//! Accounts come from two places: password registration and first-time OAuth
//! sign-in. Either way the record must carry at least one credential.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nearme_core::{DomainError, UserId};

use crate::Role;

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 100;
pub const EMAIL_MAX_LEN: usize = 255;
pub const FULL_NAME_MAX_LEN: usize = 255;

/// A persisted user account.
///
/// # Invariants
/// - `email` and `username` are globally unique (enforced by the store).
/// - `password_hash` and `external_id` are never both absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub username: String,
    /// PHC-format hash; absent for accounts created through OAuth only.
    pub password_hash: Option<String>,
    pub full_name: Option<String>,
    pub role: Role,
    pub is_active: bool,
    /// Stable subject id at the external identity provider.
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Materialize a new account from its creation request.
    pub fn create(new: NewUser, now: DateTime<Utc>) -> Result<Self, DomainError> {
        let user = Self {
            id: UserId::new(),
            email: new.email,
            username: new.username,
            password_hash: new.password_hash,
            full_name: new.full_name,
            role: new.role,
            is_active: true,
            external_id: new.external_id,
            created_at: now,
            updated_at: now,
        };
        user.ensure_has_credential()?;
        Ok(user)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether the account can sign in through the external provider.
    pub fn is_oauth_user(&self) -> bool {
        self.external_id.is_some()
    }

    pub fn ensure_has_credential(&self) -> Result<(), DomainError> {
        if self.password_hash.is_none() && self.external_id.is_none() {
            return Err(DomainError::invariant(
                "account needs a password hash or an external identity",
            ));
        }
        Ok(())
    }
}

/// Request to create an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: Option<String>,
    pub full_name: Option<String>,
    pub role: Role,
    pub external_id: Option<String>,
}

impl NewUser {
    /// Account registered with email and password.
    pub fn with_password(
        email: &str,
        username: &str,
        password_hash: String,
        full_name: Option<String>,
    ) -> Self {
        Self {
            email: normalize_email(email),
            username: username.trim().to_string(),
            password_hash: Some(password_hash),
            full_name,
            role: Role::User,
            external_id: None,
        }
    }

    /// Account created on first sight of an external identity.
    pub fn from_external(
        email: &str,
        username: String,
        external_id: String,
        full_name: Option<String>,
    ) -> Self {
        Self {
            email: normalize_email(email),
            username,
            password_hash: None,
            full_name,
            role: Role::User,
            external_id: Some(external_id),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }
}

/// Canonical form used for storage and lookups.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic structural email check: one `@`, non-empty local part, dotted domain.
pub fn validate_email(email: &str) -> Result<(), DomainError> {
    let email = email.trim();
    if email.is_empty() || email.len() > EMAIL_MAX_LEN {
        return Err(DomainError::validation("invalid email format"));
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err(DomainError::validation("invalid email format"));
    };
    let domain_ok = !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.');
    if local.is_empty() || !domain_ok || email.chars().any(char::is_whitespace) {
        return Err(DomainError::validation("invalid email format"));
    }
    Ok(())
}

/// Usernames chosen by people: 3–100 chars, alphanumeric with optional `_` or `-`.
pub fn validate_username(username: &str) -> Result<(), DomainError> {
    let len = username.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(DomainError::validation(format!(
            "username must be between {USERNAME_MIN_LEN} and {USERNAME_MAX_LEN} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return Err(DomainError::validation(
            "username must be alphanumeric (with optional _ or -)",
        ));
    }
    Ok(())
}

pub fn validate_full_name(full_name: Option<&str>) -> Result<(), DomainError> {
    match full_name {
        Some(name) if name.chars().count() > FULL_NAME_MAX_LEN => Err(DomainError::validation(
            format!("full name must be at most {FULL_NAME_MAX_LEN} characters"),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn password_account_is_active_user_by_default() {
        let new = NewUser::with_password(" Alice@Example.com ", "alice", "$argon2id$x".into(), None);
        let user = User::create(new, now()).unwrap();

        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.role, Role::User);
        assert!(user.is_active);
        assert!(!user.is_oauth_user());
    }

    #[test]
    fn account_without_any_credential_is_rejected() {
        let mut new = NewUser::from_external("bob@example.com", "bob".into(), "sub-1".into(), None);
        new.external_id = None;

        let err = User::create(new, now()).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn oauth_account_has_no_password() {
        let new = NewUser::from_external("bob@example.com", "bob".into(), "sub-1".into(), None);
        let user = User::create(new, now()).unwrap();
        assert!(user.password_hash.is_none());
        assert!(user.is_oauth_user());
    }

    #[test]
    fn email_shapes() {
        assert!(validate_email("a@b.co").is_ok());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("a@nodot").is_err());
        assert!(validate_email("a@b@c.com").is_err());
        assert!(validate_email("a b@c.com").is_err());
    }

    #[test]
    fn username_rules() {
        assert!(validate_username("alice_01-x").is_ok());
        assert!(validate_username("al").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("dot.ted").is_err());
        assert!(validate_username(&"a".repeat(101)).is_err());
    }
}
