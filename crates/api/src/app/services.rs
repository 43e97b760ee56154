use std::sync::Arc;

use chrono::Duration;
use thiserror::Error;

use nearme_auth::{CsrfGuard, HashingCost, PasswordError, PasswordHasher};
use nearme_infra::{
    config::{AuthConfig, ConfigError},
    identity::{AccountService, AdminService, IdentityResolver, OAuthBridge},
    oauth::IdentityProvider,
    store::{SessionStore, UserStore},
};

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Password(#[from] PasswordError),
}

/// Cookie attributes that depend on configuration.
#[derive(Debug, Clone, Copy)]
pub struct CookieSettings {
    pub secure: bool,
    pub session_max_age: Duration,
    pub csrf_max_age: Duration,
}

/// Everything a handler can reach, shared behind one `Arc`.
pub struct AppServices {
    pub resolver: IdentityResolver,
    pub accounts: Arc<AccountService>,
    pub admin: AdminService,
    pub bridge: OAuthBridge,
    pub provider: Arc<dyn IdentityProvider>,
    pub csrf: CsrfGuard,
    pub cookies: CookieSettings,
    pub trust_proxy_headers: bool,
}

impl AppServices {
    /// Wire the identity services over the given stores.
    pub fn build(
        config: &AuthConfig,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        provider: Arc<dyn IdentityProvider>,
        hashing: HashingCost,
    ) -> Result<Self, ServicesError> {
        let codec = config.token_codec()?;
        let csrf = config.csrf_guard()?;
        let hasher = PasswordHasher::new(hashing)?;

        let accounts = Arc::new(AccountService::new(
            users.clone(),
            sessions.clone(),
            hasher,
            codec.clone(),
            csrf.clone(),
        ));

        Ok(Self {
            resolver: IdentityResolver::new(codec, users.clone(), sessions.clone()),
            bridge: OAuthBridge::new(users.clone(), accounts.clone()),
            admin: AdminService::new(users, sessions),
            accounts,
            provider,
            csrf,
            cookies: CookieSettings {
                secure: config.cookie_secure,
                session_max_age: config.access_token_ttl,
                csrf_max_age: config.csrf_max_age,
            },
            trust_proxy_headers: config.trust_proxy_headers,
        })
    }
}
