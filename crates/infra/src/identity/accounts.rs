//! Password accounts: registration, login, logout, renewal and profile edits.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use nearme_auth::{
    AuthzError, ClientMeta, CsrfGuard, CsrfPair, NewSession, NewUser, PasswordHasher, Role, Session,
    TokenCodec, TokenSubject, User, generate_session_token, normalize_email, validate_email,
    validate_full_name, validate_password, validate_username,
};

use super::AuthError;
use crate::store::{SessionStore, UniqueField, UserStore};

/// Self-service registration request.
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub username: String,
    pub password: String,
    pub full_name: Option<String>,
}

/// Partial profile edit; `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub full_name: Option<String>,
}

/// Everything a successful sign-in hands back to the client.
#[derive(Debug, Clone)]
pub struct IssuedCredentials {
    pub user: User,
    pub access_token: String,
    pub session: Session,
    pub csrf: CsrfPair,
}

/// Result of an explicit renewal.
#[derive(Debug, Clone)]
pub struct Renewal {
    pub access_token: String,
    /// The extended session, when the request carried an active one.
    pub session: Option<Session>,
    pub csrf: CsrfPair,
}

pub struct AccountService {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    hasher: PasswordHasher,
    codec: TokenCodec,
    csrf: CsrfGuard,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        hasher: PasswordHasher,
        codec: TokenCodec,
        csrf: CsrfGuard,
    ) -> Self {
        Self {
            users,
            sessions,
            hasher,
            codec,
            csrf,
        }
    }

    pub async fn register(&self, registration: Registration, now: DateTime<Utc>) -> Result<User, AuthError> {
        self.create_password_account(registration, Role::User, now).await
    }

    /// Verify a password and open a new session.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        meta: ClientMeta,
        now: DateTime<Utc>,
    ) -> Result<IssuedCredentials, AuthError> {
        let Some(mut user) = self.users.find_by_email(email).await? else {
            tracing::warn!("login refused: unknown email");
            return Err(AuthError::InvalidCredentials);
        };
        let Some(hash) = user.password_hash.clone() else {
            tracing::warn!(user_id = %user.id, "login refused: account has no password");
            return Err(AuthError::InvalidCredentials);
        };
        if !self.verify_password(password, hash).await? {
            tracing::warn!(user_id = %user.id, "login refused: wrong password");
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_active {
            tracing::warn!(user_id = %user.id, "login refused: inactive account");
            return Err(AuthError::Forbidden(AuthzError::InactiveAccount));
        }

        user.updated_at = now;
        let user = self.users.update(&user).await?;
        let issued = self.issue_credentials(user, meta, now).await?;
        tracing::info!(user_id = %issued.user.id, "password login");
        Ok(issued)
    }

    /// Revoke every session of `user`.
    pub async fn logout(&self, user: &User) -> Result<u64, AuthError> {
        let revoked = self.sessions.revoke_all(user.id).await?;
        tracing::info!(user_id = %user.id, revoked, "logout");
        Ok(revoked)
    }

    /// Extend the presented session (if active), re-mint the bearer token and
    /// rotate the CSRF pair.
    pub async fn refresh(
        &self,
        user: &User,
        session_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Renewal, AuthError> {
        let ttl = self.codec.default_ttl();
        let session = match session_token {
            Some(token) => match self.sessions.find_active(token, now).await? {
                Some(s) if s.user_id == user.id => self.sessions.extend(token, now + ttl).await?,
                _ => None,
            },
            None => None,
        };
        let access_token = self.codec.issue(&TokenSubject::for_user(user), now, None)?;
        tracing::info!(user_id = %user.id, session_extended = session.is_some(), "credentials refreshed");
        Ok(Renewal {
            access_token,
            session,
            csrf: self.csrf.issue(now),
        })
    }

    pub async fn update_profile(
        &self,
        user: &User,
        update: ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<User, AuthError> {
        let mut next = user.clone();
        if let Some(username) = update.username.map(|u| u.trim().to_string()) {
            if username != user.username {
                validate_username(&username)?;
                if self.users.username_taken(&username).await? {
                    return Err(AuthError::Conflict(UniqueField::Username));
                }
                next.username = username;
            }
        }
        if let Some(full_name) = update.full_name {
            validate_full_name(Some(&full_name))?;
            next.full_name = Some(full_name);
        }
        next.updated_at = now;
        Ok(self.users.update(&next).await?)
    }

    /// A standalone CSRF pair for clients that have not signed in yet.
    pub fn csrf_pair(&self, now: DateTime<Utc>) -> CsrfPair {
        self.csrf.issue(now)
    }

    /// Create the first administrator unless an account with that email exists.
    pub async fn bootstrap_admin(
        &self,
        email: &str,
        username: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, AuthError> {
        if self.users.find_by_email(email).await?.is_some() {
            tracing::debug!("bootstrap admin already present");
            return Ok(None);
        }
        let registration = Registration {
            email: email.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            full_name: None,
        };
        let admin = self.create_password_account(registration, Role::Admin, now).await?;
        tracing::info!(user_id = %admin.id, "bootstrap admin created");
        Ok(Some(admin))
    }

    /// Mint a bearer token, a session row and a CSRF pair for `user`.
    pub async fn issue_credentials(
        &self,
        user: User,
        meta: ClientMeta,
        now: DateTime<Utc>,
    ) -> Result<IssuedCredentials, AuthError> {
        let access_token = self.codec.issue(&TokenSubject::for_user(&user), now, None)?;
        let session = self
            .sessions
            .create(
                NewSession {
                    user_id: user.id,
                    token: generate_session_token(),
                    expires_at: now + self.codec.default_ttl(),
                    client_ip: meta.ip,
                    user_agent: meta.user_agent,
                },
                now,
            )
            .await?;
        Ok(IssuedCredentials {
            user,
            access_token,
            session,
            csrf: self.csrf.issue(now),
        })
    }

    async fn create_password_account(
        &self,
        registration: Registration,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<User, AuthError> {
        let email = normalize_email(&registration.email);
        let username = registration.username.trim().to_string();
        validate_email(&email)?;
        validate_username(&username)?;
        validate_password(&registration.password)?;
        validate_full_name(registration.full_name.as_deref())?;

        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AuthError::Conflict(UniqueField::Email));
        }
        if self.users.username_taken(&username).await? {
            return Err(AuthError::Conflict(UniqueField::Username));
        }

        let hash = self.hash_password(registration.password).await?;
        let new = NewUser::with_password(&email, &username, hash, registration.full_name).with_role(role);
        // A concurrent registration can still win the race; the store reports it as a conflict.
        let user = self.users.insert(new, now).await?;
        tracing::info!(user_id = %user.id, role = %user.role, "account registered");
        Ok(user)
    }

    async fn hash_password(&self, password: String) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("hashing task failed: {e}")))?
            .map_err(AuthError::from)
    }

    async fn verify_password(&self, password: &str, hash: String) -> Result<bool, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("verification task failed: {e}")))?
            .map_err(AuthError::from)
    }
}
