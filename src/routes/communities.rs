use askama::Template;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::extractors::{ClientKind, CurrentUser};
use crate::routes::home::{Html, PostView};
use crate::state::AppState;

/// A community joined with its live member count.
#[derive(Debug, Clone, Serialize)]
pub struct CommunityView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub community_type: String,
    pub member_count: i64,
    pub joined: bool,
}

#[derive(Template)]
#[template(path = "pages/communities.html")]
pub struct CommunitiesTemplate {
    pub communities: Vec<CommunityView>,
    pub error: String,
}

#[derive(Template)]
#[template(path = "pages/community.html")]
pub struct CommunityTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub community_type: String,
    pub member_count: i64,
    pub is_member: bool,
    pub can_delete: bool,
    pub posts: Vec<PostView>,
}

#[derive(Deserialize)]
pub struct NewCommunityForm {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub community_type: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/communities", get(list))
        .route("/communities/new", post(create))
        .route("/communities/{id}", get(show))
        .route("/communities/{id}/delete", post(delete))
        .route("/communities/{id}/join", post(join))
        .route("/communities/{id}/leave", post(leave))
        .route("/communities/create-post", post(create_post))
}

/// All communities with a joined flag for the viewer.
fn all_communities(
    conn: &rusqlite::Connection,
    user_id: &str,
) -> Result<Vec<CommunityView>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.description, c.community_type, \
                (SELECT COUNT(*) FROM memberships m WHERE m.community_id = c.id), \
                EXISTS(SELECT 1 FROM memberships m \
                       WHERE m.community_id = c.id AND m.user_id = ?1) \
         FROM communities c \
         ORDER BY c.name",
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok(CommunityView {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            community_type: row.get(3)?,
            member_count: row.get(4)?,
            joined: row.get(5)?,
        })
    })?;
    rows.collect()
}

fn community_posts(
    conn: &rusqlite::Connection,
    community_id: &str,
) -> Result<Vec<PostView>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT p.id, u.username, c.name, p.community_id, p.body, \
                COALESCE(p.image_path, ''), p.created_at, \
                (SELECT COUNT(*) FROM post_likes pl WHERE pl.post_id = p.id) \
         FROM posts p \
         JOIN users u ON u.id = p.user_id \
         JOIN communities c ON c.id = p.community_id \
         WHERE p.community_id = ?1 \
         ORDER BY p.created_at DESC, p.rowid DESC",
    )?;
    let rows = stmt.query_map(params![community_id], |row| {
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
    })?;
    rows.collect()
}

/// GET /communities
async fn list(
    State(state): State<AppState>,
    client: ClientKind,
    user: CurrentUser,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let communities = all_communities(&conn, &user.0.id)?;

    if client.wants_json() {
        return Ok(Json(json!({ "communities": communities })).into_response());
    }
    Ok(Html(CommunitiesTemplate {
        communities,
        error: String::new(),
    })
    .into_response())
}

/// POST /communities/new
///
/// A name collision is reported as a distinct duplicate outcome carrying
/// the existing community, so the caller can offer joining it instead.
async fn create(
    State(state): State<AppState>,
    client: ClientKind,
    user: CurrentUser,
    Form(form): Form<NewCommunityForm>,
) -> AppResult<Response> {
    let name = form.name.trim().to_string();
    if name.is_empty() {
        return match client {
            ClientKind::Api => Ok((
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": "Community name is required." })),
            )
                .into_response()),
            ClientKind::Browser => {
                let conn = state.db.get()?;
                let communities = all_communities(&conn, &user.0.id)?;
                Ok((
                    StatusCode::BAD_REQUEST,
                    Html(CommunitiesTemplate {
                        communities,
                        error: "Community name is required.".to_string(),
                    }),
                )
                    .into_response())
            }
        };
    }

    let description = form.description.trim().to_string();
    let community_type = {
        let t = form.community_type.trim();
        if t.is_empty() { "general" } else { t }.to_string()
    };

    let id = uuid::Uuid::now_v7().to_string();
    let insert = {
        let mut conn = state.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = tx.execute(
            "INSERT INTO communities (id, name, description, community_type, created_by) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, name, description, community_type, user.0.id],
        );
        match result {
            Ok(_) => {
                // The creator is implicitly a member
                tx.execute(
                    "INSERT INTO memberships (user_id, community_id) VALUES (?1, ?2)",
                    params![user.0.id, id],
                )?;
                tx.commit()?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    };

    if let Err(e) = insert {
        if !is_unique_violation(&e) {
            return Err(e.into());
        }
        // Surface the existing community so the caller can offer to join it
        let conn = state.db.get()?;
        let existing: Option<(String, String)> = conn
            .query_row(
                "SELECT id, name FROM communities WHERE name = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let message = format!("A community named \"{}\" already exists.", name);
        return match client {
            ClientKind::Api => Ok((
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "duplicate": true,
                    "error": message,
                    "existing": existing.map(|(id, name)| json!({ "id": id, "name": name })),
                })),
            )
                .into_response()),
            ClientKind::Browser => {
                let communities = all_communities(&conn, &user.0.id)?;
                Ok((
                    StatusCode::BAD_REQUEST,
                    Html(CommunitiesTemplate {
                        communities,
                        error: message,
                    }),
                )
                    .into_response())
            }
        };
    }

    tracing::info!(%name, "Community created");

    match client {
        ClientKind::Api => Ok(Json(json!({
            "success": true,
            "community": { "id": id, "name": name },
        }))
        .into_response()),
        ClientKind::Browser => Ok(Redirect::to(&format!("/communities/{}", id)).into_response()),
    }
}

/// GET /communities/{id}
async fn show(
    State(state): State<AppState>,
    client: ClientKind,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;

    let community: Option<(String, String, String, String)> = conn
        .query_row(
            "SELECT name, description, community_type, created_by \
             FROM communities WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;
    let Some((name, description, community_type, created_by)) = community else {
        return Err(AppError::NotFound);
    };

    let member_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM memberships WHERE community_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    let is_member: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM memberships WHERE community_id = ?1 AND user_id = ?2)",
        params![id, user.0.id],
        |row| row.get(0),
    )?;
    let can_delete = created_by == user.0.id || user.is_admin();
    let posts = community_posts(&conn, &id)?;

    if client.wants_json() {
        return Ok(Json(json!({
            "community": {
                "id": id,
                "name": name,
                "description": description,
                "community_type": community_type,
                "member_count": member_count,
            },
            "is_member": is_member,
            "posts": posts,
        }))
        .into_response());
    }

    Ok(Html(CommunityTemplate {
        id,
        name,
        description,
        community_type,
        member_count,
        is_member,
        can_delete,
        posts,
    })
    .into_response())
}

/// POST /communities/{id}/delete
///
/// Only the creator or an admin may delete. Dependent rows go first -
/// likes, posts, memberships - inside one transaction.
async fn delete(
    State(state): State<AppState>,
    client: ClientKind,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let mut conn = state.db.get()?;

    let created_by: Option<String> = conn
        .query_row(
            "SELECT created_by FROM communities WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(created_by) = created_by else {
        return Err(AppError::NotFound);
    };

    if created_by != user.0.id && !user.is_admin() {
        return Err(AppError::Forbidden);
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute(
        "DELETE FROM post_likes WHERE post_id IN \
         (SELECT id FROM posts WHERE community_id = ?1)",
        params![id],
    )?;
    tx.execute("DELETE FROM posts WHERE community_id = ?1", params![id])?;
    tx.execute(
        "DELETE FROM memberships WHERE community_id = ?1",
        params![id],
    )?;
    tx.execute("DELETE FROM communities WHERE id = ?1", params![id])?;
    tx.commit()?;

    tracing::info!(community_id = %id, "Community deleted");

    match client {
        ClientKind::Api => Ok(Json(json!({ "success": true })).into_response()),
        ClientKind::Browser => Ok(Redirect::to("/communities").into_response()),
    }
}

/// POST /communities/{id}/join - idempotent
async fn join(
    State(state): State<AppState>,
    client: ClientKind,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;

    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM communities WHERE id = ?1)",
        params![id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(AppError::NotFound);
    }

    conn.execute(
        "INSERT OR IGNORE INTO memberships (user_id, community_id) VALUES (?1, ?2)",
        params![user.0.id, id],
    )?;

    match client {
        ClientKind::Api => Ok(Json(json!({ "success": true })).into_response()),
        ClientKind::Browser => Ok(Redirect::to(&format!("/communities/{}", id)).into_response()),
    }
}

/// POST /communities/{id}/leave - idempotent
async fn leave(
    State(state): State<AppState>,
    client: ClientKind,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    conn.execute(
        "DELETE FROM memberships WHERE user_id = ?1 AND community_id = ?2",
        params![user.0.id, id],
    )?;

    match client {
        ClientKind::Api => Ok(Json(json!({ "success": true })).into_response()),
        ClientKind::Browser => Ok(Redirect::to("/communities").into_response()),
    }
}

/// POST /communities/create-post - multipart form with an optional image
async fn create_post(
    State(state): State<AppState>,
    client: ClientKind,
    user: CurrentUser,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let mut post_text = String::new();
    let mut community_id = String::new();
    let mut image: Option<(String, axum::body::Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid form data: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "post_text" => {
                post_text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Invalid form data: {}", e)))?;
            }
            "community_id" => {
                community_id = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Invalid form data: {}", e)))?;
            }
            "post_image" => {
                let filename = field.file_name().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Invalid upload: {}", e)))?;
                if let Some(filename) = filename {
                    if !data.is_empty() {
                        image = Some((filename, data));
                    }
                }
            }
            _ => {}
        }
    }

    let post_text = post_text.trim().to_string();
    if post_text.is_empty() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "Post text is required." })),
        )
            .into_response());
    }
    if community_id.is_empty() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "Community is required." })),
        )
            .into_response());
    }

    {
        let conn = state.db.get()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM communities WHERE id = ?1)",
            params![community_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(AppError::NotFound);
        }
        let is_member: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM memberships \
             WHERE community_id = ?1 AND user_id = ?2)",
            params![community_id, user.0.id],
            |row| row.get(0),
        )?;
        if !is_member {
            return Err(AppError::Forbidden);
        }
    }

    // Store the image out of band, referenced by filename
    let image_path = match image {
        Some((original_name, data)) => {
            let filename = format!(
                "{}.{}",
                uuid::Uuid::now_v7(),
                file_extension(&original_name)
            );
            let dir = state.config.uploads_path();
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| AppError::Internal(format!("Upload dir error: {}", e)))?;
            tokio::fs::write(dir.join(&filename), &data)
                .await
                .map_err(|e| AppError::Internal(format!("Upload write error: {}", e)))?;
            Some(filename)
        }
        None => None,
    };

    let post_id = uuid::Uuid::now_v7().to_string();
    {
        let conn = state.db.get()?;
        conn.execute(
            "INSERT INTO posts (id, user_id, community_id, body, image_path) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![post_id, user.0.id, community_id, post_text, image_path],
        )?;
    }

    match client {
        ClientKind::Api => Ok(Json(json!({
            "success": true,
            "post": {
                "id": post_id,
                "community_id": community_id,
                "image_path": image_path,
            },
        }))
        .into_response()),
        ClientKind::Browser => {
            Ok(Redirect::to(&format!("/communities/{}", community_id)).into_response())
        }
    }
}

/// Lowercased alphanumeric extension from an uploaded filename, capped at
/// 8 chars; anything else becomes "bin".
fn file_extension(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string())
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
