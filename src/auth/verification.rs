use rusqlite::{params, OptionalExtension, TransactionBehavior};

use crate::auth::session;
use crate::db::models::{Role, User};
use crate::state::DbPool;

fn get_conn(
    pool: &DbPool,
) -> Result<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>, rusqlite::Error> {
    pool.get().map_err(|e| {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(e.to_string()),
        )
    })
}

/// Store a pending registration and return its token.
pub fn issue_token(
    pool: &DbPool,
    email: &str,
    username: &str,
    password_hash: &str,
) -> Result<String, rusqlite::Error> {
    let conn = get_conn(pool)?;
    let token = session::generate_token();

    conn.execute(
        "INSERT INTO verification_tokens (token, email, username, password_hash) \
         VALUES (?1, ?2, ?3, ?4)",
        params![token, email, username, password_hash],
    )?;

    Ok(token)
}

/// Exchange a verification token for a user row.
///
/// Runs as one IMMEDIATE transaction: look up the token, delete it, insert
/// the user. Two concurrent redemptions of the same token cannot both
/// succeed - the loser either sees no token row or deletes zero rows, and
/// the unique constraints on users are the backstop.
///
/// Returns `None` for an unknown (or already redeemed) token.
pub fn redeem_token(pool: &DbPool, token: &str) -> Result<Option<User>, rusqlite::Error> {
    let mut conn = get_conn(pool)?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let pending: Option<(String, String, String)> = tx
        .query_row(
            "SELECT email, username, password_hash FROM verification_tokens WHERE token = ?1",
            params![token],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((email, username, password_hash)) = pending else {
        return Ok(None);
    };

    let deleted = tx.execute(
        "DELETE FROM verification_tokens WHERE token = ?1",
        params![token],
    )?;
    if deleted == 0 {
        return Ok(None);
    }

    let user_id = uuid::Uuid::now_v7().to_string();
    tx.execute(
        "INSERT INTO users (id, username, email, password_hash) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, username, email, password_hash],
    )?;

    let created_at: String = tx.query_row(
        "SELECT created_at FROM users WHERE id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;

    tx.commit()?;

    Ok(Some(User {
        id: user_id,
        username,
        email,
        password_hash,
        role: Role::Member,
        first_name: String::new(),
        last_name: String::new(),
        profile_picture: None,
        bio: None,
        created_at,
    }))
}
