use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;

use nearme_auth::{CSRF_COOKIE_NAME, CSRF_HEADER_NAME, requires_csrf};

use crate::app::cookies;
use nearme_infra::identity::AuthError;

use crate::app::errors::{ApiError, CSRF_MISSING_MESSAGE, json_error};
use crate::app::services::AppServices;

/// Double-submit check for every state-changing request.
pub async fn csrf_guard(
    State(services): State<Arc<AppServices>>,
    req: Request,
    next: Next,
) -> Response {
    if !requires_csrf(req.method().as_str()) {
        return next.run(req).await;
    }

    let jar = CookieJar::from_headers(req.headers());
    let cookie = cookies::value(&jar, CSRF_COOKIE_NAME);
    let header = req
        .headers()
        .get(CSRF_HEADER_NAME)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());

    let (Some(cookie), Some(header)) = (cookie, header) else {
        tracing::warn!(method = %req.method(), path = %req.uri().path(), "csrf token missing");
        return json_error(StatusCode::FORBIDDEN, "csrf_missing", CSRF_MISSING_MESSAGE);
    };

    if !services
        .csrf
        .verify(cookie, header, services.cookies.csrf_max_age, Utc::now())
    {
        tracing::warn!(method = %req.method(), path = %req.uri().path(), "csrf token rejected");
        return ApiError::from(AuthError::InvalidCsrf).into_response();
    }

    next.run(req).await
}

const SECURITY_HEADERS: [(&str, &str); 6] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("permissions-policy", "geolocation=(self), microphone=(), camera=()"),
    ("strict-transport-security", "max-age=31536000; includeSubDomains"),
];

pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    response
}

/// Logs each request with its outcome and stamps `X-Process-Time` (seconds).
pub async fn request_logging(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut response = next.run(req).await;

    let elapsed = started.elapsed();
    tracing::info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = elapsed.as_millis() as u64,
        "request"
    );
    if let Ok(value) = HeaderValue::from_str(&format!("{:.4}", elapsed.as_secs_f64())) {
        response.headers_mut().insert("x-process-time", value);
    }
    response
}
