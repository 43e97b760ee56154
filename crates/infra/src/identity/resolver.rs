//! Turns request credentials into an authenticated principal.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use nearme_auth::{AuthzError, TokenCodec, User};

use super::AuthError;
use crate::store::{SessionStore, UserStore};

/// Raw credentials pulled off a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Credentials<'a> {
    /// Value of `Authorization: Bearer <..>`.
    pub bearer: Option<&'a str>,
    /// Value of the `session_token` cookie.
    pub session_token: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Bearer,
    SessionCookie,
}

/// Tried in order; the first channel that yields a user wins.
const CHANNELS: [Channel; 2] = [Channel::Bearer, Channel::SessionCookie];

pub struct IdentityResolver {
    codec: TokenCodec,
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
}

impl IdentityResolver {
    pub fn new(codec: TokenCodec, users: Arc<dyn UserStore>, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            codec,
            users,
            sessions,
        }
    }

    /// Resolve the principal, requiring an active account.
    pub async fn resolve(
        &self,
        credentials: &Credentials<'_>,
        now: DateTime<Utc>,
    ) -> Result<User, AuthError> {
        for channel in CHANNELS {
            if let Some(user) = self.try_channel(channel, credentials, now).await? {
                if !user.is_active {
                    tracing::warn!(user_id = %user.id, "inactive account presented credentials");
                    return Err(AuthError::Forbidden(AuthzError::InactiveAccount));
                }
                return Ok(user);
            }
        }
        Err(AuthError::Unauthenticated)
    }

    /// Like [`resolve`](Self::resolve) but never fails: any problem, store
    /// faults and inactive accounts included, reads as anonymous.
    pub async fn resolve_optional(
        &self,
        credentials: &Credentials<'_>,
        now: DateTime<Utc>,
    ) -> Option<User> {
        match self.resolve(credentials, now).await {
            Ok(user) => Some(user),
            Err(AuthError::Store(e)) => {
                tracing::warn!(error = %e, "optional identity lookup failed");
                None
            }
            Err(_) => None,
        }
    }

    async fn try_channel(
        &self,
        channel: Channel,
        credentials: &Credentials<'_>,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, AuthError> {
        match channel {
            Channel::Bearer => {
                let Some(token) = credentials.bearer else {
                    return Ok(None);
                };
                let Ok(claims) = self.codec.verify(token, now) else {
                    return Ok(None);
                };
                Ok(self.users.get(claims.subject).await?)
            }
            Channel::SessionCookie => {
                let Some(token) = credentials.session_token else {
                    return Ok(None);
                };
                let Some(session) = self.sessions.find_active(token, now).await? else {
                    return Ok(None);
                };
                Ok(self.users.get(session.user_id).await?)
            }
        }
    }
}
