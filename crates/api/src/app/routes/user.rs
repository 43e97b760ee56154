use std::sync::Arc;

use axum::{Extension, Json, Router, routing::get};
use chrono::Utc;

use nearme_infra::identity::ProfileUpdate;

use crate::app::dto::{ProfileUpdateRequest, UserResponse};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::CurrentUser;

pub fn router() -> Router {
    Router::new().route("/me", get(me).put(update_me))
}

pub async fn me(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(UserResponse::from(&user))
}

pub async fn update_me(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<ProfileUpdateRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let update = ProfileUpdate {
        username: body.username,
        full_name: body.full_name,
    };
    let updated = services.accounts.update_profile(&user, update, Utc::now()).await?;
    Ok(Json(UserResponse::from(&updated)))
}
