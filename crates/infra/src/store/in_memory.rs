use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use nearme_auth::{NewSession, NewUser, Role, Session, SessionStats, User, normalize_email};
use nearme_core::UserId;

use super::r#trait::{SessionStore, StoreError, UniqueField, UserStats, UserStore};

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, User>,
    /// Keyed by session token.
    sessions: HashMap<String, Session>,
}

impl State {
    /// First unique column that `candidate` would collide on, ignoring its own row.
    fn user_conflict(&self, candidate: &User) -> Option<UniqueField> {
        self.users
            .values()
            .filter(|u| u.id != candidate.id)
            .find_map(|u| {
                if u.email == candidate.email {
                    Some(UniqueField::Email)
                } else if u.username == candidate.username {
                    Some(UniqueField::Username)
                } else if u.external_id.is_some() && u.external_id == candidate.external_id {
                    Some(UniqueField::ExternalId)
                } else {
                    None
                }
            })
    }
}

/// In-memory credential and session store.
///
/// Intended for tests/dev. Every operation takes the lock once, so each call
/// is atomic with respect to the others.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl UserStore for InMemoryStore {
    async fn insert(&self, new: NewUser, now: DateTime<Utc>) -> Result<User, StoreError> {
        let user = User::create(new, now)?;
        let mut state = self.write()?;
        if let Some(field) = state.user_conflict(&user) {
            return Err(StoreError::Conflict(field));
        }
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = normalize_email(email);
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn username_taken(&self, username: &str) -> Result<bool, StoreError> {
        Ok(self.read()?.users.values().any(|u| u.username == username))
    }

    async fn update(&self, user: &User) -> Result<User, StoreError> {
        user.ensure_has_credential()?;
        let mut state = self.write()?;
        if !state.users.contains_key(&user.id) {
            return Err(StoreError::NotFound);
        }
        if let Some(field) = state.user_conflict(user) {
            return Err(StoreError::Conflict(field));
        }
        state.users.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn list(&self, offset: u64, limit: u64) -> Result<Vec<User>, StoreError> {
        let state = self.read()?;
        let mut users: Vec<&User> = state.users.values().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(users
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<UserStats, StoreError> {
        let state = self.read()?;
        let mut stats = UserStats::default();
        for u in state.users.values() {
            stats.total_users += 1;
            if u.is_active {
                stats.active_users += 1;
            } else {
                stats.inactive_users += 1;
            }
            match u.role {
                Role::Admin => stats.admin_users += 1,
                Role::User => stats.regular_users += 1,
            }
            if u.external_id.is_some() {
                stats.oauth_users += 1;
            }
            if u.password_hash.is_some() {
                stats.password_users += 1;
            }
        }
        Ok(stats)
    }

    async fn delete(&self, id: UserId) -> Result<bool, StoreError> {
        let mut state = self.write()?;
        if state.users.remove(&id).is_none() {
            return Ok(false);
        }
        state.sessions.retain(|_, s| s.user_id != id);
        Ok(true)
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemoryStore {
    async fn create(&self, new: NewSession, now: DateTime<Utc>) -> Result<Session, StoreError> {
        let mut state = self.write()?;
        if !state.users.contains_key(&new.user_id) {
            return Err(StoreError::NotFound);
        }
        if state.sessions.contains_key(&new.token) {
            return Err(StoreError::Conflict(UniqueField::SessionToken));
        }
        let session = Session::create(new, now);
        state.sessions.insert(session.token.clone(), session.clone());
        Ok(session)
    }

    async fn find_active(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        Ok(self
            .read()?
            .sessions
            .get(token)
            .filter(|s| s.is_active(now))
            .cloned())
    }

    async fn revoke(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.write()?.sessions.remove(token).is_some())
    }

    async fn revoke_all(&self, user_id: UserId) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - state.sessions.len()) as u64)
    }

    async fn sweep_expired(
        &self,
        user_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| {
            let in_scope = user_id.is_none_or(|id| s.user_id == id);
            !(in_scope && s.expires_at <= now)
        });
        Ok((before - state.sessions.len()) as u64)
    }

    async fn extend(
        &self,
        token: &str,
        new_expiry: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let mut state = self.write()?;
        Ok(state.sessions.get_mut(token).map(|s| {
            s.expires_at = new_expiry;
            s.clone()
        }))
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Session>, StoreError> {
        let state = self.read()?;
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(sessions)
    }

    async fn stats(
        &self,
        user_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<SessionStats, StoreError> {
        let state = self.read()?;
        let mut stats = SessionStats::default();
        for s in state
            .sessions
            .values()
            .filter(|s| user_id.is_none_or(|id| s.user_id == id))
        {
            stats.total_sessions += 1;
            if s.is_active(now) {
                stats.active_sessions += 1;
            } else {
                stats.expired_sessions += 1;
            }
        }
        Ok(stats)
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.created_at >= cutoff);
        Ok((before - state.sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use nearme_auth::generate_session_token;

    fn alice() -> NewUser {
        NewUser::with_password("alice@example.com", "alice", "$argon2id$h".into(), None)
    }

    fn bob() -> NewUser {
        NewUser::with_password("bob@example.com", "bob", "$argon2id$h".into(), None)
    }

    fn session_for(user: &User, expires_at: DateTime<Utc>) -> NewSession {
        NewSession {
            user_id: user.id,
            token: generate_session_token(),
            expires_at,
            client_ip: Some("127.0.0.1".into()),
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn unique_columns_are_enforced() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.insert(alice(), now).await.unwrap();

        let same_email = NewUser::with_password("ALICE@example.com", "other", "h".into(), None);
        assert_eq!(
            store.insert(same_email, now).await.unwrap_err(),
            StoreError::Conflict(UniqueField::Email)
        );

        let same_username = NewUser::with_password("x@example.com", "alice", "h".into(), None);
        assert_eq!(
            store.insert(same_username, now).await.unwrap_err(),
            StoreError::Conflict(UniqueField::Username)
        );

        store
            .insert(NewUser::from_external("g@example.com", "g".into(), "sub-1".into(), None), now)
            .await
            .unwrap();
        let same_subject = NewUser::from_external("h@example.com", "h".into(), "sub-1".into(), None);
        assert_eq!(
            store.insert(same_subject, now).await.unwrap_err(),
            StoreError::Conflict(UniqueField::ExternalId)
        );
    }

    #[tokio::test]
    async fn email_lookup_is_normalized() {
        let store = InMemoryStore::new();
        let user = store.insert(alice(), Utc::now()).await.unwrap();
        let found = store.find_by_email("  Alice@EXAMPLE.com").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(user.id));
    }

    #[tokio::test]
    async fn update_rechecks_the_credential_invariant() {
        let store = InMemoryStore::new();
        let mut user = store.insert(alice(), Utc::now()).await.unwrap();
        user.password_hash = None;
        assert!(matches!(store.update(&user).await, Err(StoreError::Invalid(_))));
    }

    #[tokio::test]
    async fn find_active_expires_lazily() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let user = store.insert(alice(), now).await.unwrap();
        let session = store
            .create(session_for(&user, now + Duration::minutes(30)), now)
            .await
            .unwrap();

        let before = session.expires_at - Duration::seconds(1);
        assert!(store.find_active(&session.token, before).await.unwrap().is_some());
        assert!(store.find_active(&session.token, session.expires_at).await.unwrap().is_none());

        // The expired row is still there until something sweeps it.
        assert_eq!(store.list_for_user(user.id).await.unwrap().len(), 1);
        assert_eq!(store.sweep_expired(None, session.expires_at).await.unwrap(), 1);
        assert!(store.list_for_user(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_session_token_conflicts() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let user = store.insert(alice(), now).await.unwrap();
        let new = session_for(&user, now + Duration::minutes(5));

        store.create(new.clone(), now).await.unwrap();
        assert_eq!(
            store.create(new, now).await.unwrap_err(),
            StoreError::Conflict(UniqueField::SessionToken)
        );
    }

    #[tokio::test]
    async fn revoke_all_isolates_users() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let a = store.insert(alice(), now).await.unwrap();
        let b = store.insert(bob(), now).await.unwrap();
        let later = now + Duration::hours(1);

        store.create(session_for(&a, later), now).await.unwrap();
        store.create(session_for(&a, later), now).await.unwrap();
        let kept = store.create(session_for(&b, later), now).await.unwrap();

        assert_eq!(store.revoke_all(a.id).await.unwrap(), 2);
        assert!(store.list_for_user(a.id).await.unwrap().is_empty());
        assert!(store.find_active(&kept.token, now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn scoped_sweep_leaves_other_users_alone() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let a = store.insert(alice(), now).await.unwrap();
        let b = store.insert(bob(), now).await.unwrap();
        let past = now - Duration::minutes(1);

        store.create(session_for(&a, past), now).await.unwrap();
        store.create(session_for(&b, past), now).await.unwrap();

        assert_eq!(store.sweep_expired(Some(a.id), now).await.unwrap(), 1);
        let stats = SessionStore::stats(&store, None, now).await.unwrap();
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.expired_sessions, 1);
    }

    #[tokio::test]
    async fn extend_moves_expiry_in_place() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let user = store.insert(alice(), now).await.unwrap();
        let session = store.create(session_for(&user, now + Duration::minutes(1)), now).await.unwrap();

        let new_expiry = now + Duration::hours(2);
        let extended = store.extend(&session.token, new_expiry).await.unwrap().unwrap();
        assert_eq!(extended.id, session.id);
        assert_eq!(extended.expires_at, new_expiry);
        assert!(store.extend("missing", new_expiry).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_a_user_cascades_to_sessions() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let user = store.insert(alice(), now).await.unwrap();
        let session = store.create(session_for(&user, now + Duration::hours(1)), now).await.unwrap();

        assert!(store.delete(user.id).await.unwrap());
        assert!(store.find_active(&session.token, now).await.unwrap().is_none());
        assert!(!store.delete(user.id).await.unwrap());
    }

    #[tokio::test]
    async fn purge_by_creation_time() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let user = store.insert(alice(), now).await.unwrap();
        let later = now + Duration::days(60);
        store.create(session_for(&user, later), now - Duration::days(40)).await.unwrap();
        store.create(session_for(&user, later), now).await.unwrap();

        assert_eq!(store.purge_created_before(now - Duration::days(30)).await.unwrap(), 1);
        assert_eq!(store.list_for_user(user.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn user_stats_count_each_dimension() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.insert(alice().with_role(Role::Admin), now).await.unwrap();
        let mut b = store.insert(bob(), now).await.unwrap();
        b.is_active = false;
        store.update(&b).await.unwrap();
        store
            .insert(NewUser::from_external("g@example.com", "g".into(), "sub".into(), None), now)
            .await
            .unwrap();

        let stats = UserStore::stats(&store).await.unwrap();
        assert_eq!(stats.total_users, 3);
        assert_eq!(stats.active_users, 2);
        assert_eq!(stats.inactive_users, 1);
        assert_eq!(stats.admin_users, 1);
        assert_eq!(stats.regular_users, 2);
        assert_eq!(stats.oauth_users, 1);
        assert_eq!(stats.password_users, 2);
    }
}
