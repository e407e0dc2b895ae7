use askama::Template;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use rusqlite::params;
use serde::Deserialize;
use serde_json::json;

use crate::auth::passwords;
use crate::db::models::User;
use crate::error::{AppError, AppResult};
use crate::extractors::{ClientKind, CurrentUser};
use crate::routes::home::Html;
use crate::state::AppState;

#[derive(Template)]
#[template(path = "pages/profile.html")]
pub struct ProfileTemplate {
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub bio: String,
    pub profile_picture: String,
    pub error: String,
}

#[derive(Deserialize)]
pub struct ProfileForm {
    pub bio: String,
    pub avatar_url: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordForm {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/profile", get(profile_page).post(update_profile))
        .route("/profile/change-password", post(change_password))
}

fn profile_template(user: &User, error: &str) -> ProfileTemplate {
    ProfileTemplate {
        username: user.username.clone(),
        email: user.email.clone(),
        display_name: user.display_name(),
        role: user.role.as_str().to_string(),
        bio: user.bio.clone().unwrap_or_default(),
        profile_picture: user.profile_picture.clone().unwrap_or_default(),
        error: error.to_string(),
    }
}

/// GET /profile
async fn profile_page(client: ClientKind, user: CurrentUser) -> AppResult<Response> {
    if client.wants_json() {
        let display_name = user.0.display_name();
        return Ok(Json(json!({
            "username": user.0.username,
            "email": user.0.email,
            "display_name": display_name,
            "role": user.0.role,
            "first_name": user.0.first_name,
            "last_name": user.0.last_name,
            "bio": user.0.bio,
            "profile_picture": user.0.profile_picture,
        }))
        .into_response());
    }

    Ok(Html(profile_template(&user.0, "")).into_response())
}

/// POST /profile - update bio and avatar URL
async fn update_profile(
    State(state): State<AppState>,
    client: ClientKind,
    user: CurrentUser,
    Form(form): Form<ProfileForm>,
) -> AppResult<Response> {
    let bio = form.bio.trim();
    let avatar_url = form.avatar_url.trim();

    let conn = state.db.get()?;
    let updated = conn.execute(
        "UPDATE users SET bio = ?1, profile_picture = ?2 WHERE id = ?3",
        params![
            bio,
            if avatar_url.is_empty() {
                None
            } else {
                Some(avatar_url)
            },
            user.0.id
        ],
    )?;

    if updated == 0 {
        return Err(AppError::NotFound);
    }

    if client.wants_json() {
        return Ok(Json(json!({ "success": true })).into_response());
    }
    Ok(Redirect::to("/profile").into_response())
}

/// POST /profile/change-password
async fn change_password(
    State(state): State<AppState>,
    client: ClientKind,
    user: CurrentUser,
    Form(form): Form<ChangePasswordForm>,
) -> AppResult<Response> {
    if form.current_password.is_empty()
        || form.new_password.is_empty()
        || form.confirm_password.is_empty()
    {
        return Ok(password_failure(
            client,
            &user.0,
            "All password fields are required.",
        ));
    }

    if form.new_password != form.confirm_password {
        return Ok(password_failure(
            client,
            &user.0,
            "New passwords do not match.",
        ));
    }

    if !passwords::verify(&form.current_password, &user.0.password_hash) {
        return Ok(password_failure(
            client,
            &user.0,
            "Current password is incorrect.",
        ));
    }

    let new_hash = passwords::hash(&form.new_password)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?;

    let conn = state.db.get()?;
    let updated = conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE id = ?2",
        params![new_hash, user.0.id],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound);
    }

    tracing::info!(username = %user.0.username, "Password changed");

    if client.wants_json() {
        return Ok(Json(json!({ "success": true, "message": "Password updated." })).into_response());
    }
    Ok(Redirect::to("/profile").into_response())
}

fn password_failure(client: ClientKind, user: &User, message: &str) -> Response {
    match client {
        ClientKind::Api => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": message })),
        )
            .into_response(),
        ClientKind::Browser => {
            (StatusCode::BAD_REQUEST, Html(profile_template(user, message))).into_response()
        }
    }
}
