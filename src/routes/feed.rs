use askama::Template;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use rusqlite::params;
use serde_json::json;

use crate::error::AppResult;
use crate::extractors::{ClientKind, CurrentUser};
use crate::routes::communities::CommunityView;
use crate::routes::home::{member_posts, Html, PostView};
use crate::state::AppState;

#[derive(Template)]
#[template(path = "pages/explore.html")]
pub struct ExploreTemplate {
    pub communities: Vec<CommunityView>,
}

#[derive(Template)]
#[template(path = "pages/activity.html")]
pub struct ActivityTemplate {
    pub posts: Vec<PostView>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/explore", get(explore))
        .route("/activity", get(activity))
}

/// GET /explore - communities the user has not joined
async fn explore(
    State(state): State<AppState>,
    client: ClientKind,
    user: CurrentUser,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.description, c.community_type, \
                (SELECT COUNT(*) FROM memberships m WHERE m.community_id = c.id) \
         FROM communities c \
         WHERE c.id NOT IN \
               (SELECT community_id FROM memberships WHERE user_id = ?1) \
         ORDER BY c.name",
    )?;
    let communities: Vec<CommunityView> = stmt
        .query_map(params![user.0.id], |row| {
            Ok(CommunityView {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                community_type: row.get(3)?,
                member_count: row.get(4)?,
                joined: false,
            })
        })?
        .collect::<Result<_, _>>()?;

    if client.wants_json() {
        return Ok(Json(json!({ "communities": communities })).into_response());
    }
    Ok(Html(ExploreTemplate { communities }).into_response())
}

/// GET /activity - full post history across the user's communities
async fn activity(
    State(state): State<AppState>,
    client: ClientKind,
    user: CurrentUser,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let posts = member_posts(&conn, &user.0.id, None)?;

    if client.wants_json() {
        return Ok(Json(json!({ "posts": posts })).into_response());
    }
    Ok(Html(ActivityTemplate { posts }).into_response())
}
