//! Administrative account and session management.
//!
//! Callers are expected to have passed the admin policy check already.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use nearme_auth::{Role, SessionStats, User};
use nearme_core::UserId;

use super::AuthError;
use crate::store::{SessionStore, UserStats, UserStore};

pub const MAX_PAGE_SIZE: u64 = 100;

/// Upper bound for the age handed to a session purge (about a century).
pub const MAX_PURGE_AGE_DAYS: i64 = 36_500;

pub struct AdminService {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
}

impl AdminService {
    pub fn new(users: Arc<dyn UserStore>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { users, sessions }
    }

    /// Page through accounts; `limit` is clamped to `1..=MAX_PAGE_SIZE`.
    pub async fn list_users(&self, offset: u64, limit: u64) -> Result<Vec<User>, AuthError> {
        Ok(self.users.list(offset, limit.clamp(1, MAX_PAGE_SIZE)).await?)
    }

    pub async fn user_stats(&self) -> Result<UserStats, AuthError> {
        Ok(self.users.stats().await?)
    }

    pub async fn session_stats(
        &self,
        user_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<SessionStats, AuthError> {
        Ok(self.sessions.stats(user_id, now).await?)
    }

    pub async fn cleanup_expired_sessions(
        &self,
        user_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<u64, AuthError> {
        let removed = self.sessions.sweep_expired(user_id, now).await?;
        tracing::info!(removed, scoped = user_id.is_some(), "expired sessions swept");
        Ok(removed)
    }

    /// Drop sessions created more than `days` days ago, expired or not.
    pub async fn purge_sessions_older_than(
        &self,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<u64, AuthError> {
        let cutoff = (1..=MAX_PURGE_AGE_DAYS)
            .contains(&days)
            .then(|| Duration::try_days(days))
            .flatten()
            .and_then(|age| now.checked_sub_signed(age))
            .ok_or_else(|| {
                AuthError::Validation(format!(
                    "older_than_days must be between 1 and {MAX_PURGE_AGE_DAYS}"
                ))
            })?;
        let removed = self.sessions.purge_created_before(cutoff).await?;
        tracing::info!(removed, "old sessions purged");
        Ok(removed)
    }

    pub async fn activate(&self, id: UserId, now: DateTime<Utc>) -> Result<User, AuthError> {
        self.set_active(id, true, now).await
    }

    /// Deactivate and sign the account out everywhere.
    pub async fn deactivate(&self, id: UserId, now: DateTime<Utc>) -> Result<User, AuthError> {
        let user = self.set_active(id, false, now).await?;
        let revoked = self.sessions.revoke_all(id).await?;
        tracing::info!(user_id = %id, revoked, "sessions revoked on deactivation");
        Ok(user)
    }

    pub async fn change_role(&self, id: UserId, role: Role, now: DateTime<Utc>) -> Result<User, AuthError> {
        let mut user = self.load(id).await?;
        let previous = user.role;
        user.role = role;
        user.updated_at = now;
        let user = self.users.update(&user).await?;
        tracing::info!(user_id = %id, from = %previous, to = %role, "role changed");
        Ok(user)
    }

    async fn set_active(&self, id: UserId, active: bool, now: DateTime<Utc>) -> Result<User, AuthError> {
        let mut user = self.load(id).await?;
        user.is_active = active;
        user.updated_at = now;
        let user = self.users.update(&user).await?;
        tracing::info!(user_id = %id, active, "account status changed");
        Ok(user)
    }

    async fn load(&self, id: UserId) -> Result<User, AuthError> {
        self.users.get(id).await?.ok_or(AuthError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearme_auth::{NewSession, NewUser, generate_session_token};

    use crate::store::InMemoryStore;

    async fn seeded() -> (Arc<InMemoryStore>, AdminService, User) {
        let store = Arc::new(InMemoryStore::new());
        let user = store
            .insert(
                NewUser::with_password("a@example.com", "alice", "$argon2id$h".into(), None),
                Utc::now(),
            )
            .await
            .unwrap();
        let admin = AdminService::new(store.clone(), store.clone());
        (store, admin, user)
    }

    async fn open_session(store: &InMemoryStore, user: &User, expires_at: DateTime<Utc>) -> String {
        let new = NewSession {
            user_id: user.id,
            token: generate_session_token(),
            expires_at,
            client_ip: None,
            user_agent: None,
        };
        store.create(new, Utc::now()).await.unwrap().token
    }

    #[tokio::test]
    async fn deactivation_revokes_sessions() {
        let (store, admin, user) = seeded().await;
        let now = Utc::now();
        let token = open_session(&store, &user, now + Duration::hours(1)).await;

        let updated = admin.deactivate(user.id, now).await.unwrap();
        assert!(!updated.is_active);
        assert!(store.find_active(&token, now).await.unwrap().is_none());

        assert!(admin.activate(user.id, now).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let (_store, admin, _user) = seeded().await;
        assert!(matches!(
            admin.activate(UserId::new(), Utc::now()).await,
            Err(AuthError::NotFound)
        ));
        assert!(matches!(
            admin.change_role(UserId::new(), Role::Admin, Utc::now()).await,
            Err(AuthError::NotFound)
        ));
    }

    #[tokio::test]
    async fn role_change_is_persisted() {
        let (store, admin, user) = seeded().await;
        admin.change_role(user.id, Role::Admin, Utc::now()).await.unwrap();
        assert_eq!(store.get(user.id).await.unwrap().unwrap().role, Role::Admin);
    }

    #[tokio::test]
    async fn cleanup_counts_only_expired_rows() {
        let (store, admin, user) = seeded().await;
        let now = Utc::now();
        open_session(&store, &user, now - Duration::minutes(1)).await;
        open_session(&store, &user, now + Duration::minutes(10)).await;

        assert_eq!(admin.cleanup_expired_sessions(None, now).await.unwrap(), 1);
        let stats = admin.session_stats(Some(user.id), now).await.unwrap();
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.active_sessions, 1);
    }

    #[tokio::test]
    async fn page_size_is_clamped() {
        let (store, admin, _user) = seeded().await;
        for i in 0..3 {
            store
                .insert(
                    NewUser::with_password(&format!("u{i}@example.com"), &format!("user{i}"), "h".into(), None),
                    Utc::now(),
                )
                .await
                .unwrap();
        }
        assert_eq!(admin.list_users(0, 0).await.unwrap().len(), 1);
        assert_eq!(admin.list_users(1, 1000).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn purge_age_is_bounded() {
        let (store, admin, user) = seeded().await;
        let now = Utc::now();
        open_session(&store, &user, now + Duration::hours(1)).await;

        for days in [0, -3, MAX_PURGE_AGE_DAYS + 1, i64::MAX] {
            assert!(
                matches!(
                    admin.purge_sessions_older_than(days, now).await,
                    Err(AuthError::Validation(_))
                ),
                "{days}"
            );
        }
        assert_eq!(admin.purge_sessions_older_than(MAX_PURGE_AGE_DAYS, now).await.unwrap(), 0);
        assert_eq!(
            admin
                .purge_sessions_older_than(1, now + Duration::days(2))
                .await
                .unwrap(),
            1
        );
    }
}
