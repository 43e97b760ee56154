use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::app::dto::UserResponse;
use crate::context::OptionalUser;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(OptionalUser(user): OptionalUser) -> impl IntoResponse {
    Json(json!({
        "authenticated": user.is_some(),
        "user": user.as_ref().map(UserResponse::from),
    }))
}
