//! Request context: the authenticated principal and client metadata.
//!
//! Extractors read the `Authorization` header and the `session_token` cookie
//! and hand them to the [`IdentityResolver`](nearme_infra::identity::IdentityResolver)
//! held in the shared [`AppServices`].

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{HeaderMap, header, request::Parts};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;

use nearme_auth::{ClientMeta, Role, User, authorize};
use nearme_infra::identity::{AuthError, Credentials};

use crate::app::cookies::{self, SESSION_COOKIE_NAME};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

/// An authenticated, active account.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// The principal if one could be resolved, anonymous otherwise.
#[derive(Debug, Clone)]
pub struct OptionalUser(pub Option<User>);

/// An authenticated account holding the `admin` role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

/// Client address and user agent recorded on new sessions.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta(pub ClientMeta);

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

fn services(parts: &Parts) -> Result<Arc<AppServices>, ApiError> {
    parts
        .extensions
        .get::<Arc<AppServices>>()
        .cloned()
        .ok_or_else(|| ApiError::Auth(AuthError::Internal("services extension missing".into())))
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let services = services(parts)?;
        let jar = CookieJar::from_headers(&parts.headers);
        let credentials = Credentials {
            bearer: bearer_token(&parts.headers),
            session_token: cookies::value(&jar, SESSION_COOKIE_NAME),
        };
        let user = services.resolver.resolve(&credentials, Utc::now()).await?;
        Ok(CurrentUser(user))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for OptionalUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let services = services(parts)?;
        let jar = CookieJar::from_headers(&parts.headers);
        let credentials = Credentials {
            bearer: bearer_token(&parts.headers),
            session_token: cookies::value(&jar, SESSION_COOKIE_NAME),
        };
        Ok(OptionalUser(
            services.resolver.resolve_optional(&credentials, Utc::now()).await,
        ))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if let Err(e) = authorize(&user, Role::Admin) {
            tracing::warn!(user_id = %user.id, "admin route refused");
            return Err(AuthError::Forbidden(e).into());
        }
        Ok(AdminUser(user))
    }
}

/// Longest user agent kept on a session row.
pub const MAX_USER_AGENT_LEN: usize = 512;

/// Client metadata for a request.
///
/// The socket peer is the address of record. Forwarding headers are read only
/// when `trust_proxy` is set, and only values that parse as an IP address are
/// kept.
pub fn client_meta(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> ClientMeta {
    let forwarded = trust_proxy.then(|| forwarded_ip(headers)).flatten();
    let ip = forwarded.or_else(|| peer.map(|addr| addr.ip()));
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.chars().take(MAX_USER_AGENT_LEN).collect());
    ClientMeta {
        ip: ip.map(|ip| ip.to_string()),
        user_agent,
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let parse = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };
    parse("x-forwarded-for").or_else(|| parse("x-real-ip"))
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let trust_proxy = parts
            .extensions
            .get::<Arc<AppServices>>()
            .is_some_and(|services| services.trust_proxy_headers);
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(RequestMeta(client_meta(&parts.headers, peer, trust_proxy)))
    }
}
