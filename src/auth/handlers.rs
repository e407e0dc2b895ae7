use askama::Template;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Form, Json};
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use serde_json::json;

use crate::auth::{passwords, session, verification};
use crate::db::models::{Role, User};
use crate::error::{AppError, AppResult};
use crate::extractors::{ClientKind, MaybeUser};
use crate::mail;
use crate::routes::home::Html;
use crate::state::AppState;

const INVALID_CREDENTIALS: &str = "Incorrect username or password.";
const USERNAME_TAKEN: &str = "Username already exists. Please try again.";
const EMAIL_TAKEN: &str = "Email already exists. Please try again.";
const INVALID_TOKEN: &str = "Invalid or expired verification token.";

// -- Templates --

#[derive(Template)]
#[template(path = "pages/login.html")]
pub struct LoginTemplate {
    pub error: String,
}

#[derive(Template)]
#[template(path = "pages/register.html")]
pub struct RegisterTemplate {
    pub error: String,
}

#[derive(Template)]
#[template(path = "pages/check_email.html")]
pub struct CheckEmailTemplate {
    pub email: String,
}

#[derive(Template)]
#[template(path = "pages/verify_error.html")]
pub struct VerifyErrorTemplate {
    pub message: String,
}

// -- Request types --

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RegisterForm {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct VerifyQuery {
    pub token: Option<String>,
}

// -- Cookie helpers --

fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    let max_age_secs = max_age_hours * 3600;
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        name, token, max_age_secs
    )
}

fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0", name)
}

fn get_cookie_value<'a>(parts: &'a axum::http::request::Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == name {
                Some(val)
            } else {
                None
            }
        })
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// -- Registration handlers --

/// GET /register - render the registration page
pub async fn register_page(maybe_user: MaybeUser) -> AppResult<Response> {
    if maybe_user.0.is_some() {
        return Ok(Redirect::to("/home").into_response());
    }
    Ok(Html(RegisterTemplate {
        error: String::new(),
    })
    .into_response())
}

fn register_failure(client: ClientKind, status: StatusCode, message: &str) -> Response {
    match client {
        ClientKind::Api => (
            status,
            Json(json!({ "success": false, "error": message })),
        )
            .into_response(),
        ClientKind::Browser => (
            status,
            Html(RegisterTemplate {
                error: message.to_string(),
            }),
        )
            .into_response(),
    }
}

/// POST /register - store a pending registration and email a verification
/// link. The account only exists once the link is followed.
pub async fn register(
    State(state): State<AppState>,
    client: ClientKind,
    Form(form): Form<RegisterForm>,
) -> AppResult<Response> {
    let email = form.email.trim().to_string();
    let username = form.username.trim().to_string();

    if email.is_empty() || username.is_empty() || form.password.is_empty() {
        return Ok(register_failure(
            client,
            StatusCode::BAD_REQUEST,
            "Email, username, and password are required.",
        ));
    }

    {
        let conn = state.db.get()?;
        let username_taken: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM users WHERE username = ?1",
            params![username],
            |row| row.get(0),
        )?;
        if username_taken {
            return Ok(register_failure(
                client,
                StatusCode::BAD_REQUEST,
                USERNAME_TAKEN,
            ));
        }

        let email_taken: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM users WHERE email = ?1",
            params![email],
            |row| row.get(0),
        )?;
        if email_taken {
            return Ok(register_failure(
                client,
                StatusCode::BAD_REQUEST,
                EMAIL_TAKEN,
            ));
        }
    }

    let password_hash = passwords::hash(&form.password)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?;

    let token = verification::issue_token(&state.db, &email, &username, &password_hash)?;

    // Out of band: a slow SMTP server must not hold up the response, and a
    // send failure leaves the token valid (it is only logged).
    mail::dispatch_verification(
        state.mailer.clone(),
        state.config.base_url(),
        email.clone(),
        token,
    );

    tracing::info!(%username, "Registration pending email verification");

    match client {
        ClientKind::Api => Ok((
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Verification email sent. Check your inbox.",
            })),
        )
            .into_response()),
        ClientKind::Browser => Ok(Html(CheckEmailTemplate { email }).into_response()),
    }
}

/// GET /verify-email?token=... - exchange the token for an account and log
/// the new user in.
pub async fn verify_email(
    State(state): State<AppState>,
    client: ClientKind,
    Query(query): Query<VerifyQuery>,
) -> AppResult<Response> {
    let token = query.token.unwrap_or_default();
    if token.is_empty() {
        return Ok(verify_failure(client, INVALID_TOKEN));
    }

    let user = match verification::redeem_token(&state.db, &token) {
        Ok(Some(user)) => user,
        Ok(None) => return Ok(verify_failure(client, INVALID_TOKEN)),
        // The username or email was claimed between registration and
        // verification; the token row is gone either way.
        Err(e) if is_unique_violation(&e) => {
            return Ok(verify_failure(client, USERNAME_TAKEN));
        }
        Err(e) => return Err(e.into()),
    };

    let session_token =
        session::create_session(&state.db, &user.id, state.config.auth.session_hours)?;
    let cookie = session_cookie(
        &state.config.auth.cookie_name,
        &session_token,
        state.config.auth.session_hours,
    );

    tracing::info!(username = %user.username, "Email verified, account created");

    match client {
        ClientKind::Api => Ok((
            StatusCode::OK,
            [(header::SET_COOKIE, cookie)],
            Json(json!({ "success": true, "user": user })),
        )
            .into_response()),
        ClientKind::Browser => Ok((
            StatusCode::SEE_OTHER,
            [
                (header::LOCATION, "/home".to_string()),
                (header::SET_COOKIE, cookie),
            ],
            "",
        )
            .into_response()),
    }
}

fn verify_failure(client: ClientKind, message: &str) -> Response {
    match client {
        ClientKind::Api => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": message })),
        )
            .into_response(),
        ClientKind::Browser => (
            StatusCode::BAD_REQUEST,
            Html(VerifyErrorTemplate {
                message: message.to_string(),
            }),
        )
            .into_response(),
    }
}

// -- Login handlers --

/// GET /login - render login page
pub async fn login_page(maybe_user: MaybeUser) -> AppResult<Response> {
    if maybe_user.0.is_some() {
        return Ok(Redirect::to("/home").into_response());
    }
    Ok(Html(LoginTemplate {
        error: String::new(),
    })
    .into_response())
}

fn login_failure(client: ClientKind, status: StatusCode, message: &str) -> Response {
    match client {
        ClientKind::Api => (
            status,
            Json(json!({ "success": false, "error": message })),
        )
            .into_response(),
        ClientKind::Browser => (
            status,
            Html(LoginTemplate {
                error: message.to_string(),
            }),
        )
            .into_response(),
    }
}

/// POST /login - verify credentials and establish a session.
///
/// Unknown usernames and wrong passwords get the same message, so the
/// endpoint cannot be used to enumerate accounts.
pub async fn login(
    State(state): State<AppState>,
    client: ClientKind,
    Form(form): Form<LoginForm>,
) -> AppResult<Response> {
    let username = form.username.trim();
    if username.is_empty() || form.password.is_empty() {
        return Ok(login_failure(
            client,
            StatusCode::BAD_REQUEST,
            "Username and password are required.",
        ));
    }

    let user: Option<User> = {
        let conn = state.db.get()?;
        conn.query_row(
            "SELECT id, username, email, password_hash, role, first_name, last_name, \
                    profile_picture, bio, created_at \
             FROM users WHERE username = ?1",
            params![username],
            |row| {
                let role: String = row.get(4)?;
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    email: row.get(2)?,
                    password_hash: row.get(3)?,
                    role: Role::from_str(&role),
                    first_name: row.get(5)?,
                    last_name: row.get(6)?,
                    profile_picture: row.get(7)?,
                    bio: row.get(8)?,
                    created_at: row.get(9)?,
                })
            },
        )
        .optional()?
    };

    let Some(user) = user else {
        return Ok(login_failure(
            client,
            StatusCode::UNAUTHORIZED,
            INVALID_CREDENTIALS,
        ));
    };

    if !passwords::verify(&form.password, &user.password_hash) {
        return Ok(login_failure(
            client,
            StatusCode::UNAUTHORIZED,
            INVALID_CREDENTIALS,
        ));
    }

    let token = session::create_session(&state.db, &user.id, state.config.auth.session_hours)?;
    let cookie = session_cookie(
        &state.config.auth.cookie_name,
        &token,
        state.config.auth.session_hours,
    );

    match client {
        ClientKind::Api => Ok((
            StatusCode::OK,
            [(header::SET_COOKIE, cookie)],
            // Safe projection: User skips the hash when serialized
            Json(json!({ "success": true, "user": user })),
        )
            .into_response()),
        ClientKind::Browser => Ok((
            StatusCode::SEE_OTHER,
            [
                (header::LOCATION, "/home".to_string()),
                (header::SET_COOKIE, cookie),
            ],
            "",
        )
            .into_response()),
    }
}

// -- Logout handler --

/// GET /logout - delete the session and redirect to the login page
pub async fn logout(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> AppResult<Response> {
    let (parts, _body) = request.into_parts();

    if let Some(token) = get_cookie_value(&parts, &state.config.auth.cookie_name) {
        let _ = session::delete_session(&state.db, token);
    }

    Ok((
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, "/login".to_string()),
            (
                header::SET_COOKIE,
                clear_session_cookie(&state.config.auth.cookie_name),
            ),
        ],
        "",
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_sets_attributes() {
        let cookie = session_cookie("commons_session", "tok123", 2);
        assert!(cookie.starts_with("commons_session=tok123;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Max-Age=7200"));
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let cookie = clear_session_cookie("commons_session");
        assert!(cookie.starts_with("commons_session=;"));
        assert!(cookie.contains("Max-Age=0"));
    }

    #[test]
    fn cookie_value_is_parsed_from_header() {
        let req = axum::http::Request::builder()
            .header(header::COOKIE, "other=1; commons_session=abc; x=y")
            .body(())
            .unwrap();
        let (parts, ()) = req.into_parts();
        assert_eq!(get_cookie_value(&parts, "commons_session"), Some("abc"));
        assert_eq!(get_cookie_value(&parts, "missing"), None);
    }
}
