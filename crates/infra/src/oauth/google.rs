//! Google OpenID Connect (authorization-code flow).

use secrecy::ExposeSecret;
use serde::Deserialize;
use url::Url;

use nearme_auth::ExternalIdentity;

use super::{IdentityProvider, ProviderError};
use crate::config::GoogleConfig;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const SCOPES: &str = "openid email profile";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default)]
    name: Option<String>,
}

impl UserInfo {
    fn into_identity(self) -> Result<ExternalIdentity, ProviderError> {
        let subject = self
            .sub
            .filter(|s| !s.is_empty())
            .ok_or(ProviderError::Rejected("missing subject"))?;
        let email = self
            .email
            .filter(|e| !e.is_empty())
            .ok_or(ProviderError::Rejected("missing email"))?;
        if self.email_verified != Some(true) {
            return Err(ProviderError::Rejected("email not verified"));
        }
        Ok(ExternalIdentity {
            email,
            subject,
            name: self.name.filter(|n| !n.is_empty()),
        })
    }
}

pub struct GoogleProvider {
    config: GoogleConfig,
    auth_url: Url,
    token_url: Url,
    userinfo_url: Url,
    http: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(config: GoogleConfig) -> Result<Self, url::ParseError> {
        Ok(Self {
            config,
            auth_url: Url::parse(AUTH_URL)?,
            token_url: Url::parse(TOKEN_URL)?,
            userinfo_url: Url::parse(USERINFO_URL)?,
            http: reqwest::Client::new(),
        })
    }

    /// Point the token and userinfo calls somewhere else (a local fake in tests).
    #[must_use]
    pub fn with_endpoints(mut self, token_url: Url, userinfo_url: Url) -> Self {
        self.token_url = token_url;
        self.userinfo_url = userinfo_url;
        self
    }

    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, ProviderError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let detail = response.text().await.unwrap_or_default();
        Err(ProviderError::Upstream {
            operation,
            status: Some(status),
            detail,
        })
    }
}

#[async_trait::async_trait]
impl IdentityProvider for GoogleProvider {
    fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("scope", SCOPES)
            .append_pair("state", state);
        url
    }

    async fn exchange(&self, code: &str) -> Result<ExternalIdentity, ProviderError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret().as_str()),
        ];
        let response = self
            .http
            .post(self.token_url.clone())
            .form(&params)
            .send()
            .await?;
        let token = Self::ensure_success(response, "token exchange")
            .await?
            .json::<TokenResponse>()
            .await?;

        let response = self
            .http
            .get(self.userinfo_url.clone())
            .bearer_auth(&token.access_token)
            .send()
            .await?;
        let info = Self::ensure_success(response, "userinfo request")
            .await?
            .json::<UserInfo>()
            .await?;

        let identity = info.into_identity()?;
        tracing::debug!(subject = %identity.subject, "google identity verified");
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn provider() -> GoogleProvider {
        GoogleProvider::new(GoogleConfig {
            client_id: "cid".into(),
            client_secret: SecretString::new("shh".into()),
            redirect_uri: Url::parse("http://localhost:8000/api/auth/google/callback").unwrap(),
        })
        .unwrap()
    }

    #[test]
    fn authorization_url_carries_state_and_client() {
        let url = provider().authorization_url("st4te");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("accounts.google.com"));
        assert!(pairs.contains(&("state".into(), "st4te".into())));
        assert!(pairs.contains(&("client_id".into(), "cid".into())));
        assert!(pairs.contains(&("response_type".into(), "code".into())));
        assert!(!url.as_str().contains("shh"));
    }

    #[test]
    fn userinfo_requires_verified_email() {
        let info = UserInfo {
            sub: Some("123".into()),
            email: Some("a@example.com".into()),
            email_verified: Some(false),
            name: None,
        };
        assert!(matches!(info.into_identity(), Err(ProviderError::Rejected(_))));
    }

    #[test]
    fn userinfo_requires_subject_and_email() {
        let no_sub = UserInfo {
            sub: None,
            email: Some("a@example.com".into()),
            email_verified: Some(true),
            name: None,
        };
        assert!(no_sub.into_identity().is_err());

        let ok = UserInfo {
            sub: Some("123".into()),
            email: Some("a@example.com".into()),
            email_verified: Some(true),
            name: Some("Ann".into()),
        };
        let identity = ok.into_identity().unwrap();
        assert_eq!(identity.subject, "123");
        assert_eq!(identity.name.as_deref(), Some("Ann"));
    }
}
