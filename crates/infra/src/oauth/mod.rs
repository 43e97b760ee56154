//! External identity providers.

pub mod google;

pub use google::GoogleProvider;

use thiserror::Error;
use url::Url;

use nearme_auth::ExternalIdentity;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{operation} failed (status {status:?}): {detail}")]
    Upstream {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },

    /// The provider answered but the assertion is unusable.
    #[error("rejected identity: {0}")]
    Rejected(&'static str),
}

/// An OAuth authorization-code provider that yields verified identities.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send the browser, bound to `state`.
    fn authorization_url(&self, state: &str) -> Url;

    /// Redeem an authorization code for the identity behind it.
    async fn exchange(&self, code: &str) -> Result<ExternalIdentity, ProviderError>;
}
