use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use rusqlite::params;

use crate::db::models::{Role, User};
use crate::error::AppError;
use crate::state::AppState;

/// How the client wants responses rendered, negotiated on the Accept header
/// alone. HTML is the default; JSON only when Accept names application/json.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Browser,
    Api,
}

impl ClientKind {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let accept = headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if accept.contains("application/json") {
            ClientKind::Api
        } else {
            ClientKind::Browser
        }
    }

    pub fn wants_json(self) -> bool {
        self == ClientKind::Api
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ClientKind {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientKind::from_headers(&parts.headers))
    }
}

/// The currently authenticated user, re-fetched from the users table on
/// every request so profile edits are never stale.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.0.role == Role::Admin
    }
}

/// Extractor that requires authentication.
/// API-style clients (Accept: application/json) are rejected with 401;
/// browser clients are redirected to the login page.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let unauthenticated = match ClientKind::from_headers(&parts.headers) {
            ClientKind::Api => AppError::Unauthenticated,
            ClientKind::Browser => AppError::LoginRedirect,
        };

        let token = extract_session_token(parts, &state.config.auth.cookie_name)
            .ok_or(unauthenticated)?;

        let conn = state.db.get()?;
        conn.query_row(
            "SELECT u.id, u.username, u.email, u.password_hash, u.role, \
                    u.first_name, u.last_name, u.profile_picture, u.bio, u.created_at \
             FROM sessions s \
             JOIN users u ON u.id = s.user_id \
             WHERE s.token = ?1 AND s.expires_at > datetime('now')",
            params![token],
            |row| {
                let role: String = row.get(4)?;
                Ok(CurrentUser(User {
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
                }))
            },
        )
        .map_err(|_| match ClientKind::from_headers(&parts.headers) {
            ClientKind::Api => AppError::Unauthenticated,
            ClientKind::Browser => AppError::LoginRedirect,
        })
    }
}

/// Optional user extractor - returns None instead of rejecting when not
/// authenticated.
pub struct MaybeUser(pub Option<User>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match CurrentUser::from_request_parts(parts, state).await {
            Ok(CurrentUser(user)) => Ok(MaybeUser(Some(user))),
            Err(_) => Ok(MaybeUser(None)),
        }
    }
}

fn extract_session_token<'a>(parts: &'a Parts, cookie_name: &str) -> Option<&'a str> {
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
            if key == cookie_name {
                Some(val)
            } else {
                None
            }
        })
}
