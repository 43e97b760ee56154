use axum::{Router, routing::get};

pub mod admin;
pub mod auth;
pub mod system;
pub mod user;

/// Router for everything under the API prefix.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/whoami", get(system::whoami))
        .nest("/auth", auth::router())
        .nest("/user", user::router())
        .nest("/admin", admin::router())
}
