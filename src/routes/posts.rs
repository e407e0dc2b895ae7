use axum::extract::{Path, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::post;
use axum::{Json, Router};
use rusqlite::{params, OptionalExtension};
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::extractors::{ClientKind, CurrentUser};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/posts/{id}/like", post(like))
}

/// POST /posts/{id}/like
///
/// Idempotent: a second like from the same user changes nothing. The count
/// is a live aggregate over like rows, never a stored counter.
async fn like(
    State(state): State<AppState>,
    client: ClientKind,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;

    let community_id: Option<String> = conn
        .query_row(
            "SELECT community_id FROM posts WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(community_id) = community_id else {
        return Err(AppError::NotFound);
    };

    conn.execute(
        "INSERT OR IGNORE INTO post_likes (user_id, post_id) VALUES (?1, ?2)",
        params![user.0.id, id],
    )?;

    let likes: i64 = conn.query_row(
        "SELECT COUNT(*) FROM post_likes WHERE post_id = ?1",
        params![id],
        |row| row.get(0),
    )?;

    match client {
        ClientKind::Api => Ok(Json(json!({ "success": true, "likes": likes })).into_response()),
        ClientKind::Browser => {
            Ok(Redirect::to(&format!("/communities/{}", community_id)).into_response())
        }
    }
}
