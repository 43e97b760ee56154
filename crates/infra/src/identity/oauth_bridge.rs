//! Maps a verified external identity onto a local account and signs it in.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use nearme_auth::{
    ClientMeta, ExternalIdentity, NewUser, User, base_username, ensure_active, normalize_email,
    username_candidates, validate_email,
};

use super::{AccountService, AuthError, IssuedCredentials};
use crate::store::{StoreError, UniqueField, UserStore};

pub struct OAuthBridge {
    users: Arc<dyn UserStore>,
    accounts: Arc<AccountService>,
}

impl OAuthBridge {
    pub fn new(users: Arc<dyn UserStore>, accounts: Arc<AccountService>) -> Self {
        Self { users, accounts }
    }

    /// Find, link or create the account behind `identity`, then issue the
    /// same credentials a password login would.
    pub async fn complete(
        &self,
        identity: ExternalIdentity,
        meta: ClientMeta,
        now: DateTime<Utc>,
    ) -> Result<IssuedCredentials, AuthError> {
        let email = normalize_email(&identity.email);
        validate_email(&email)?;

        let existing = match self.users.find_by_email(&email).await? {
            Some(user) => Some(user),
            None => self.users.find_by_external_id(&identity.subject).await?,
        };

        let user = match existing {
            Some(user) => self.link(user, &identity.subject, now).await?,
            None => self.provision(&email, &identity, now).await?,
        };

        ensure_active(&user).inspect_err(|_| {
            tracing::warn!(user_id = %user.id, "oauth sign-in refused: inactive account");
        })?;

        let issued = self.accounts.issue_credentials(user, meta, now).await?;
        tracing::info!(user_id = %issued.user.id, "oauth login");
        Ok(issued)
    }

    async fn link(&self, mut user: User, subject: &str, now: DateTime<Utc>) -> Result<User, AuthError> {
        match user.external_id.as_deref() {
            None => {
                user.external_id = Some(subject.to_string());
                user.updated_at = now;
                let user = self.users.update(&user).await?;
                tracing::info!(user_id = %user.id, "external identity linked to existing account");
                Ok(user)
            }
            Some(linked) if linked != subject => {
                tracing::warn!(
                    user_id = %user.id,
                    "email matched an account linked to a different external subject"
                );
                Ok(user)
            }
            Some(_) => Ok(user),
        }
    }

    async fn provision(
        &self,
        email: &str,
        identity: &ExternalIdentity,
        now: DateTime<Utc>,
    ) -> Result<User, AuthError> {
        let base = base_username(email);
        for candidate in username_candidates(&base) {
            if self.users.username_taken(&candidate).await? {
                continue;
            }
            let new = NewUser::from_external(
                email,
                candidate,
                identity.subject.clone(),
                identity.name.clone(),
            );
            match self.users.insert(new, now).await {
                Ok(user) => {
                    tracing::info!(user_id = %user.id, username = %user.username, "account created from external identity");
                    return Ok(user);
                }
                // Someone took the name between the check and the insert.
                Err(StoreError::Conflict(UniqueField::Username)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        tracing::warn!(base = %base, "username candidates exhausted");
        Err(AuthError::UsernameExhausted)
    }
}
