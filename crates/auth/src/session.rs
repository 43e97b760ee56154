//! Server-side session record and opaque token generation.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use nearme_core::{SessionId, UserId};

/// Bytes of OS randomness behind every session token (256 bits).
pub const SESSION_TOKEN_BYTES: usize = 32;

/// One authenticated device/browser instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    /// Opaque, unguessable and unique across all sessions.
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl Session {
    pub fn create(new: NewSession, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            user_id: new.user_id,
            token: new.token,
            expires_at: new.expires_at,
            created_at: now,
            client_ip: new.client_ip,
            user_agent: new.user_agent,
        }
    }

    /// A session is active strictly before its expiry instant.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Request to persist a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub user_id: UserId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Client metadata captured when a session is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Aggregate session counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total_sessions: u64,
    pub active_sessions: u64,
    pub expired_sessions: u64,
}

/// Generate a fresh session token from the OS CSPRNG.
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn token_is_url_safe_and_unique() {
        let a = generate_session_token();
        let b = generate_session_token();

        // 32 bytes -> 43 base64url chars without padding.
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn active_until_the_expiry_instant() {
        let now = Utc::now();
        let session = Session::create(
            NewSession {
                user_id: UserId::new(),
                token: generate_session_token(),
                expires_at: now + Duration::minutes(30),
                client_ip: None,
                user_agent: None,
            },
            now,
        );

        assert!(session.is_active(now));
        assert!(session.is_active(session.expires_at - Duration::milliseconds(1)));
        assert!(!session.is_active(session.expires_at));
    }
}
