use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use nearme_infra::identity::AuthError;
use nearme_infra::store::UniqueField;

pub const CREDENTIALS_MESSAGE: &str = "Could not validate credentials";
pub const CSRF_MISSING_MESSAGE: &str = "CSRF token missing";
pub const CSRF_INVALID_MESSAGE: &str = "Invalid CSRF token";

/// Error type every handler returns.
#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    BadRequest(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => json_error(StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Auth(err) => auth_error_to_response(err),
        }
    }
}

pub fn auth_error_to_response(err: AuthError) -> Response {
    match err {
        AuthError::Unauthenticated => unauthorized("unauthenticated", CREDENTIALS_MESSAGE),
        AuthError::InvalidCredentials => {
            unauthorized("invalid_credentials", "Incorrect email or password")
        }
        AuthError::Forbidden(e) => json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()),
        AuthError::InvalidCsrf => json_error(StatusCode::FORBIDDEN, "invalid_csrf", CSRF_INVALID_MESSAGE),
        AuthError::Conflict(field) => json_error(StatusCode::CONFLICT, "conflict", conflict_message(field)),
        AuthError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "User not found"),
        AuthError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        AuthError::UsernameExhausted => json_error(
            StatusCode::CONFLICT,
            "username_exhausted",
            "Could not derive a free username",
        ),
        AuthError::Provider(msg) => {
            tracing::warn!(error = %msg, "identity provider exchange failed");
            json_error(StatusCode::BAD_REQUEST, "provider_error", "OAuth authentication failed")
        }
        err @ (AuthError::Store(_) | AuthError::Internal(_)) => {
            tracing::error!(error = %err, "request failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error",
            )
        }
    }
}

fn conflict_message(field: UniqueField) -> String {
    match field {
        UniqueField::Email => "Email already registered".to_string(),
        UniqueField::Username => "Username already taken".to_string(),
        other => format!("{other} already in use"),
    }
}

fn unauthorized(code: &'static str, message: &'static str) -> Response {
    let mut response = json_error(StatusCode::UNAUTHORIZED, code, message);
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, header::HeaderValue::from_static("Bearer"));
    response
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
