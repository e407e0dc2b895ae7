use askama::Template;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use rusqlite::params;
use serde::Serialize;
use serde_json::json;

use crate::error::AppResult;
use crate::extractors::{ClientKind, CurrentUser, MaybeUser};
use crate::state::AppState;

/// How many posts the home feed shows.
const HOME_FEED_LIMIT: i64 = 3;

/// A post joined with its author, community, and live like count.
#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    pub id: String,
    pub author: String,
    pub community: String,
    pub community_id: String,
    pub body: String,
    /// Upload filename; empty when the post has no image.
    pub image_path: String,
    pub created_at: String,
    pub likes: i64,
}

#[derive(Template)]
#[template(path = "pages/home.html")]
pub struct HomeTemplate {
    pub username: String,
    pub posts: Vec<PostView>,
}

/// Wrapper to render askama templates as axum responses
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

/// Posts from the communities a user belongs to. `recent_limit` selects the
/// newest N; `None` returns the full history in storage order.
pub fn member_posts(
    conn: &rusqlite::Connection,
    user_id: &str,
    recent_limit: Option<i64>,
) -> Result<Vec<PostView>, rusqlite::Error> {
    let base = "SELECT p.id, u.username, c.name, p.community_id, p.body, \
                       COALESCE(p.image_path, ''), p.created_at, \
                       (SELECT COUNT(*) FROM post_likes pl WHERE pl.post_id = p.id) \
                FROM posts p \
                JOIN memberships m ON m.community_id = p.community_id AND m.user_id = ?1 \
                JOIN users u ON u.id = p.user_id \
                JOIN communities c ON c.id = p.community_id";

    let sql = match recent_limit {
        Some(_) => format!(
            "{} ORDER BY p.created_at DESC, p.rowid DESC LIMIT ?2",
            base
        ),
        None => base.to_string(),
    };

    let mut stmt = conn.prepare(&sql)?;
    let map_row = |row: &rusqlite::Row<'_>| {
        Ok(PostView {
            id: row.get(0)?,
            author: row.get(1)?,
            community: row.get(2)?,
            community_id: row.get(3)?,
            body: row.get(4)?,
            image_path: row.get(5)?,
            created_at: row.get(6)?,
            likes: row.get(7)?,
        })
    };

    let rows = match recent_limit {
        Some(limit) => stmt.query_map(params![user_id, limit], map_row)?,
        None => stmt.query_map(params![user_id], map_row)?,
    };

    rows.collect()
}

/// GET / - entry point; send the visitor wherever their session points
pub async fn index(maybe_user: MaybeUser) -> AppResult<Response> {
    if maybe_user.0.is_some() {
        Ok(Redirect::to("/home").into_response())
    } else {
        Ok(Redirect::to("/login").into_response())
    }
}

/// GET /home - the most recent posts across the user's communities
pub async fn home(
    State(state): State<AppState>,
    client: ClientKind,
    user: CurrentUser,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let posts = member_posts(&conn, &user.0.id, Some(HOME_FEED_LIMIT))?;

    if client.wants_json() {
        return Ok(Json(json!({ "posts": posts })).into_response());
    }

    Ok(Html(HomeTemplate {
        username: user.0.username,
        posts,
    })
    .into_response())
}
