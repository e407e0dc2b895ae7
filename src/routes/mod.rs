pub mod assets;
pub mod auth;
pub mod communities;
pub mod feed;
pub mod home;
pub mod posts;
pub mod profile;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

/// Assemble the full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(home::index))
        .route("/home", get(home::home))
        .route("/welcome", get(welcome))
        .route("/assets/{*path}", get(assets::serve))
        .route("/uploads/{file}", get(assets::upload))
        .merge(auth::router())
        .merge(profile::router())
        .merge(communities::router())
        .merge(posts::router())
        .merge(feed::router())
        .with_state(state)
}

/// GET /welcome - fixed health payload, served regardless of auth state
async fn welcome() -> impl IntoResponse {
    Json(json!({ "success": true, "message": "Welcome!" }))
}
