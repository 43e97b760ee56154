//! Admin routes for account and session management.
//!
//! Every handler takes [`AdminUser`], so a signed-in non-admin gets 403 and an
//! anonymous caller gets 401 before any work happens.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    routing::{delete, get, put},
};
use chrono::Utc;
use serde_json::{Value, json};

use nearme_auth::SessionStats;
use nearme_infra::store::UserStats;

use crate::app::dto::{
    ChangeRoleRequest, PageQuery, PurgeQuery, UserResponse, UserScopeQuery, parse_role,
    parse_user_id,
};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::AdminUser;

pub fn router() -> Router {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/stats", get(user_stats))
        .route("/users/:id/activate", put(activate_user))
        .route("/users/:id/deactivate", put(deactivate_user))
        .route("/users/:id/role", put(change_role))
        .route("/sessions/stats", get(session_stats))
        .route("/sessions/cleanup", delete(cleanup_sessions))
        .route("/sessions/purge", delete(purge_sessions))
}

/// GET /admin/users?offset=&limit=
pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
    AdminUser(_admin): AdminUser,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users = services.admin.list_users(page.offset, page.limit).await?;
    Ok(Json(users.iter().map(UserResponse::from).collect()))
}

/// GET /admin/users/stats
pub async fn user_stats(
    Extension(services): Extension<Arc<AppServices>>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<UserStats>, ApiError> {
    Ok(Json(services.admin.user_stats().await?))
}

/// GET /admin/sessions/stats?user_id=
pub async fn session_stats(
    Extension(services): Extension<Arc<AppServices>>,
    AdminUser(_admin): AdminUser,
    Query(scope): Query<UserScopeQuery>,
) -> Result<Json<SessionStats>, ApiError> {
    let stats = services
        .admin
        .session_stats(scope.user_id()?, Utc::now())
        .await?;
    Ok(Json(stats))
}

/// DELETE /admin/sessions/cleanup?user_id=
pub async fn cleanup_sessions(
    Extension(services): Extension<Arc<AppServices>>,
    AdminUser(admin): AdminUser,
    Query(scope): Query<UserScopeQuery>,
) -> Result<Json<Value>, ApiError> {
    let removed = services
        .admin
        .cleanup_expired_sessions(scope.user_id()?, Utc::now())
        .await?;
    tracing::info!(admin_id = %admin.id, removed, "expired session cleanup");
    Ok(Json(json!({
        "message": format!("Cleaned up {removed} expired sessions"),
        "deleted_count": removed,
    })))
}

/// DELETE /admin/sessions/purge?older_than_days=
pub async fn purge_sessions(
    Extension(services): Extension<Arc<AppServices>>,
    AdminUser(admin): AdminUser,
    Query(query): Query<PurgeQuery>,
) -> Result<Json<Value>, ApiError> {
    let removed = services
        .admin
        .purge_sessions_older_than(query.older_than_days, Utc::now())
        .await?;
    tracing::info!(admin_id = %admin.id, removed, "old session purge");
    Ok(Json(json!({
        "message": format!("Purged {removed} sessions"),
        "deleted_count": removed,
    })))
}

/// PUT /admin/users/:id/activate
pub async fn activate_user(
    Extension(services): Extension<Arc<AppServices>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user = services.admin.activate(parse_user_id(&id)?, Utc::now()).await?;
    tracing::info!(admin_id = %admin.id, user_id = %user.id, "user activated");
    Ok(Json(json!({
        "message": "User activated successfully",
        "user": UserResponse::from(&user),
    })))
}

/// PUT /admin/users/:id/deactivate
pub async fn deactivate_user(
    Extension(services): Extension<Arc<AppServices>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_user_id(&id)?;
    if id == admin.id {
        return Err(ApiError::BadRequest(
            "Cannot deactivate your own account".to_string(),
        ));
    }
    let user = services.admin.deactivate(id, Utc::now()).await?;
    tracing::info!(admin_id = %admin.id, user_id = %user.id, "user deactivated");
    Ok(Json(json!({
        "message": "User deactivated successfully",
        "user": UserResponse::from(&user),
    })))
}

/// PUT /admin/users/:id/role
pub async fn change_role(
    Extension(services): Extension<Arc<AppServices>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Json(body): Json<ChangeRoleRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let role = parse_role(&body.role)?;
    let user = services
        .admin
        .change_role(parse_user_id(&id)?, role, Utc::now())
        .await?;
    tracing::info!(admin_id = %admin.id, user_id = %user.id, role = %role, "role changed");
    Ok(Json(UserResponse::from(&user)))
}
