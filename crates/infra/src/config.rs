//! Runtime configuration, read from the environment (and an optional `.env`).

use std::net::SocketAddr;

use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

use nearme_auth::{CsrfError, CsrfGuard, TokenCodec, TokenError, parse_algorithm};

pub const DEFAULT_ALGORITHM: &str = "HS256";
pub const DEFAULT_ACCESS_TOKEN_EXPIRE_MINUTES: i64 = 30;
pub const DEFAULT_CSRF_MAX_AGE_SECONDS: i64 = 3600;
/// Upper bounds for the configurable lifetimes (one year each).
pub const MAX_ACCESS_TOKEN_EXPIRE_MINUTES: i64 = 525_600;
pub const MAX_CSRF_MAX_AGE_SECONDS: i64 = 31_536_000;
pub const DEFAULT_GOOGLE_REDIRECT_URI: &str = "http://localhost:8000/api/auth/google/callback";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

/// Shortest accepted signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("{0}")]
    Weak(String),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Csrf(#[from] CsrfError),
}

/// Google OAuth client registration.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: Url,
}

/// First administrator created at startup when absent.
#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub email: String,
    pub username: String,
    pub password: SecretString,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub secret_key: SecretString,
    /// Validated HMAC algorithm name (`HS256`, `HS384` or `HS512`).
    pub algorithm: String,
    pub access_token_ttl: Duration,
    pub csrf_secret_key: SecretString,
    pub csrf_max_age: Duration,
    pub google: GoogleConfig,
    /// Unset means the in-memory store.
    pub database_url: Option<SecretString>,
    pub bind_addr: SocketAddr,
    pub cookie_secure: bool,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`. Only
    /// safe when a reverse proxy in front of the service overwrites them.
    pub trust_proxy_headers: bool,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl AuthConfig {
    /// Load from the process environment, after merging `.env` if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(ConfigError::Invalid {
                    key: ".env",
                    reason: e.to_string(),
                });
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let secret_key = require("SECRET_KEY")?;
        let csrf_secret_key = require("CSRF_SECRET_KEY")?;
        check_secret("SECRET_KEY", &secret_key)?;
        check_secret("CSRF_SECRET_KEY", &csrf_secret_key)?;
        if secret_key == csrf_secret_key {
            return Err(ConfigError::Weak(
                "CSRF_SECRET_KEY must differ from SECRET_KEY".to_string(),
            ));
        }

        let algorithm = get("ALGORITHM").unwrap_or_else(|| DEFAULT_ALGORITHM.to_string());
        parse_algorithm(&algorithm)?;

        let ttl_minutes = parse_positive(
            "ACCESS_TOKEN_EXPIRE_MINUTES",
            get("ACCESS_TOKEN_EXPIRE_MINUTES"),
            DEFAULT_ACCESS_TOKEN_EXPIRE_MINUTES,
            MAX_ACCESS_TOKEN_EXPIRE_MINUTES,
        )?;
        let csrf_seconds = parse_positive(
            "CSRF_TOKEN_MAX_AGE_SECONDS",
            get("CSRF_TOKEN_MAX_AGE_SECONDS"),
            DEFAULT_CSRF_MAX_AGE_SECONDS,
            MAX_CSRF_MAX_AGE_SECONDS,
        )?;

        let redirect = get("GOOGLE_REDIRECT_URI").unwrap_or_else(|| DEFAULT_GOOGLE_REDIRECT_URI.to_string());
        let google = GoogleConfig {
            client_id: require("GOOGLE_CLIENT_ID")?,
            client_secret: SecretString::new(require("GOOGLE_CLIENT_SECRET")?),
            redirect_uri: Url::parse(&redirect).map_err(|e| ConfigError::Invalid {
                key: "GOOGLE_REDIRECT_URI",
                reason: e.to_string(),
            })?,
        };

        let bind = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
            key: "BIND_ADDR",
            reason: e.to_string(),
        })?;

        let cookie_secure = match get("COOKIE_SECURE") {
            None => false,
            Some(v) => parse_bool("COOKIE_SECURE", &v)?,
        };
        let trust_proxy_headers = match get("TRUST_PROXY_HEADERS") {
            None => false,
            Some(v) => parse_bool("TRUST_PROXY_HEADERS", &v)?,
        };

        let bootstrap_admin = match (
            get("BOOTSTRAP_ADMIN_EMAIL"),
            get("BOOTSTRAP_ADMIN_USERNAME"),
            get("BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (None, None, None) => None,
            (Some(email), Some(username), Some(password)) => Some(BootstrapAdmin {
                email,
                username,
                password: SecretString::new(password),
            }),
            _ => {
                return Err(ConfigError::Invalid {
                    key: "BOOTSTRAP_ADMIN_*",
                    reason: "email, username and password must be set together".to_string(),
                });
            }
        };

        Ok(Self {
            secret_key: SecretString::new(secret_key),
            algorithm,
            access_token_ttl: Duration::minutes(ttl_minutes),
            csrf_secret_key: SecretString::new(csrf_secret_key),
            csrf_max_age: Duration::seconds(csrf_seconds),
            google,
            database_url: get("DATABASE_URL").map(SecretString::new),
            bind_addr,
            cookie_secure,
            trust_proxy_headers,
            bootstrap_admin,
        })
    }

    pub fn token_codec(&self) -> Result<TokenCodec, ConfigError> {
        let algorithm = parse_algorithm(&self.algorithm)?;
        Ok(TokenCodec::new(
            self.secret_key.expose_secret().as_bytes(),
            algorithm,
            self.access_token_ttl,
        )?)
    }

    pub fn csrf_guard(&self) -> Result<CsrfGuard, ConfigError> {
        Ok(CsrfGuard::new(self.csrf_secret_key.expose_secret().as_bytes())?)
    }
}

fn check_secret(key: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.len() < MIN_SECRET_LEN {
        return Err(ConfigError::Weak(format!(
            "{key} must be at least {MIN_SECRET_LEN} bytes"
        )));
    }
    Ok(())
}

fn parse_positive(
    key: &'static str,
    raw: Option<String>,
    default: i64,
    max: i64,
) -> Result<i64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.parse::<i64>() {
        Ok(n) if (1..=max).contains(&n) => Ok(n),
        Ok(_) => Err(ConfigError::Invalid {
            key,
            reason: format!("must be between 1 and {max}"),
        }),
        Err(e) => Err(ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            key,
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("SECRET_KEY", "token-secret-0123456789"),
            ("CSRF_SECRET_KEY", "csrf-secret-0123456789"),
            ("GOOGLE_CLIENT_ID", "client-id"),
            ("GOOGLE_CLIENT_SECRET", "client-secret"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<AuthConfig, ConfigError> {
        AuthConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply() {
        let cfg = load(&base()).unwrap();

        assert_eq!(cfg.algorithm, "HS256");
        assert_eq!(cfg.access_token_ttl, Duration::minutes(30));
        assert_eq!(cfg.csrf_max_age, Duration::seconds(3600));
        assert_eq!(cfg.google.redirect_uri.as_str(), DEFAULT_GOOGLE_REDIRECT_URI);
        assert_eq!(cfg.bind_addr.port(), 8000);
        assert!(!cfg.cookie_secure);
        assert!(!cfg.trust_proxy_headers);
        assert!(cfg.database_url.is_none());
        assert!(cfg.bootstrap_admin.is_none());
        assert!(cfg.token_codec().is_ok());
        assert!(cfg.csrf_guard().is_ok());
    }

    #[test]
    fn required_secrets_are_enforced() {
        let mut vars = base();
        vars.remove("SECRET_KEY");
        assert!(matches!(load(&vars), Err(ConfigError::Missing("SECRET_KEY"))));

        let mut vars = base();
        vars.insert("CSRF_SECRET_KEY", "   ");
        assert!(matches!(load(&vars), Err(ConfigError::Missing("CSRF_SECRET_KEY"))));
    }

    #[test]
    fn secrets_must_be_distinct_and_long_enough() {
        let mut vars = base();
        vars.insert("CSRF_SECRET_KEY", "token-secret-0123456789");
        assert!(matches!(load(&vars), Err(ConfigError::Weak(_))));

        let mut vars = base();
        vars.insert("SECRET_KEY", "short");
        assert!(matches!(load(&vars), Err(ConfigError::Weak(_))));
    }

    #[test]
    fn only_hmac_algorithms() {
        let mut vars = base();
        vars.insert("ALGORITHM", "RS256");
        assert!(matches!(load(&vars), Err(ConfigError::Token(_))));

        vars.insert("ALGORITHM", "HS512");
        assert_eq!(load(&vars).unwrap().algorithm, "HS512");
    }

    #[test]
    fn numeric_settings_must_be_positive() {
        let mut vars = base();
        vars.insert("ACCESS_TOKEN_EXPIRE_MINUTES", "0");
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { .. })));

        vars.insert("ACCESS_TOKEN_EXPIRE_MINUTES", "abc");
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { .. })));

        vars.insert("ACCESS_TOKEN_EXPIRE_MINUTES", "90");
        assert_eq!(load(&vars).unwrap().access_token_ttl, Duration::minutes(90));
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let mut vars = base();
        vars.insert("ACCESS_TOKEN_EXPIRE_MINUTES", "9223372036854775807");
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { key: "ACCESS_TOKEN_EXPIRE_MINUTES", .. })
        ));

        let mut vars = base();
        vars.insert("CSRF_TOKEN_MAX_AGE_SECONDS", "9223372036854775807");
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { key: "CSRF_TOKEN_MAX_AGE_SECONDS", .. })
        ));

        let mut vars = base();
        vars.insert("ACCESS_TOKEN_EXPIRE_MINUTES", "525600");
        vars.insert("CSRF_TOKEN_MAX_AGE_SECONDS", "31536000");
        let cfg = load(&vars).unwrap();
        assert_eq!(cfg.access_token_ttl, Duration::days(365));
        assert_eq!(cfg.csrf_max_age, Duration::days(365));
    }

    #[test]
    fn proxy_headers_are_opt_in() {
        let mut vars = base();
        vars.insert("TRUST_PROXY_HEADERS", "true");
        assert!(load(&vars).unwrap().trust_proxy_headers);

        vars.insert("TRUST_PROXY_HEADERS", "sometimes");
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { key: "TRUST_PROXY_HEADERS", .. })
        ));
    }

    #[test]
    fn bootstrap_admin_is_all_or_nothing() {
        let mut vars = base();
        vars.insert("BOOTSTRAP_ADMIN_EMAIL", "root@example.com");
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { .. })));

        vars.insert("BOOTSTRAP_ADMIN_USERNAME", "root");
        vars.insert("BOOTSTRAP_ADMIN_PASSWORD", "change-me-please");
        let admin = load(&vars).unwrap().bootstrap_admin.unwrap();
        assert_eq!(admin.username, "root");
    }

    #[test]
    fn debug_output_hides_secrets() {
        let cfg = load(&base()).unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("token-secret-0123456789"));
        assert!(!rendered.contains("client-secret"));
    }
}
