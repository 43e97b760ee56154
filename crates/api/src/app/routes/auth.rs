//! Password sign-in, CSRF issuance and the Google authorization-code flow.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::Query,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;

use nearme_auth::{CSRF_COOKIE_NAME, generate_state};
use nearme_infra::identity::{AuthError, IssuedCredentials, Registration};

use crate::app::cookies::{self, OAUTH_STATE_COOKIE_NAME, SESSION_COOKIE_NAME};
use crate::app::dto::{
    CsrfTokenResponse, LoginRequest, OAuthCallbackQuery, RegisterRequest, TokenResponse,
    UserResponse,
};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::{CurrentUser, RequestMeta};

/// Where the browser lands after a successful OAuth sign-in.
pub const POST_LOGIN_REDIRECT: &str = "/profile";

pub fn router() -> Router {
    Router::new()
        .route("/csrf-token", get(csrf_token))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh", post(refresh))
        .route("/google/login", get(google_login))
        .route("/google/callback", get(google_callback))
}

/// GET /auth/csrf-token
pub async fn csrf_token(
    Extension(services): Extension<Arc<AppServices>>,
    jar: CookieJar,
) -> impl IntoResponse {
    let pair = services.accounts.csrf_pair(Utc::now());
    let jar = cookies::with_csrf(jar, &services.cookies, pair.raw);
    (
        jar,
        Json(CsrfTokenResponse {
            csrf_token: pair.signed,
        }),
    )
}

/// POST /auth/register
pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let registration = Registration {
        email: body.email,
        username: body.username,
        password: body.password,
        full_name: body.full_name,
    };
    let user = services.accounts.register(registration, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

/// POST /auth/login
pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    RequestMeta(meta): RequestMeta,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> Result<(CookieJar, Json<TokenResponse>), ApiError> {
    let issued = services
        .accounts
        .login(&body.email, &body.password, meta, Utc::now())
        .await?;
    let (jar, tokens) = sign_in(&services, jar, issued);
    Ok((jar, Json(tokens)))
}

/// POST /auth/logout
pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
) -> Result<(CookieJar, Json<serde_json::Value>), ApiError> {
    let revoked = services.accounts.logout(&user).await?;
    let jar = cookies::without(jar, SESSION_COOKIE_NAME);
    let jar = cookies::without(jar, CSRF_COOKIE_NAME);
    Ok((
        jar,
        Json(serde_json::json!({
            "message": "Logged out successfully",
            "revoked_sessions": revoked,
        })),
    ))
}

/// POST /auth/refresh
pub async fn refresh(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
) -> Result<(CookieJar, Json<TokenResponse>), ApiError> {
    let session_token = cookies::value(&jar, SESSION_COOKIE_NAME).map(str::to_string);
    let renewal = services
        .accounts
        .refresh(&user, session_token.as_deref(), Utc::now())
        .await?;

    let jar = match renewal.session {
        Some(session) => cookies::with_session(jar, &services.cookies, session.token),
        None => jar,
    };
    let jar = cookies::with_csrf(jar, &services.cookies, renewal.csrf.raw);
    Ok((
        jar,
        Json(TokenResponse::bearer(renewal.access_token, renewal.csrf.signed)),
    ))
}

/// GET /auth/google/login
pub async fn google_login(
    Extension(services): Extension<Arc<AppServices>>,
    jar: CookieJar,
) -> Response {
    let state = generate_state();
    let target = services.provider.authorization_url(&state);
    let jar = cookies::with_oauth_state(jar, &services.cookies, state);
    (jar, found(target.as_str())).into_response()
}

/// GET /auth/google/callback
pub async fn google_callback(
    Extension(services): Extension<Arc<AppServices>>,
    RequestMeta(meta): RequestMeta,
    jar: CookieJar,
    Query(query): Query<OAuthCallbackQuery>,
) -> Result<Response, ApiError> {
    if let Some(error) = query.error {
        return Err(AuthError::Provider(format!("authorization denied: {error}")).into());
    }

    let expected = cookies::value(&jar, OAUTH_STATE_COOKIE_NAME);
    let state_matches = match (expected, query.state.as_deref()) {
        (Some(expected), Some(got)) => expected == got,
        _ => false,
    };
    if !state_matches {
        tracing::warn!("oauth callback with missing or mismatched state");
        return Err(ApiError::BadRequest("Invalid state parameter".to_string()));
    }
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing authorization code".to_string()))?;

    let identity = services
        .provider
        .exchange(&code)
        .await
        .map_err(AuthError::from)?;
    let issued = services.bridge.complete(identity, meta, Utc::now()).await?;

    let jar = cookies::without(jar, OAUTH_STATE_COOKIE_NAME);
    let (jar, _) = sign_in(&services, jar, issued);
    Ok((jar, found(POST_LOGIN_REDIRECT)).into_response())
}

/// Set the session and CSRF cookies for freshly issued credentials.
fn sign_in(
    services: &AppServices,
    jar: CookieJar,
    issued: IssuedCredentials,
) -> (CookieJar, TokenResponse) {
    let jar = cookies::with_session(jar, &services.cookies, issued.session.token);
    let jar = cookies::with_csrf(jar, &services.cookies, issued.csrf.raw);
    (
        jar,
        TokenResponse::bearer(issued.access_token, issued.csrf.signed),
    )
}

fn found(location: &str) -> Response {
    match header::HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
