//! Demo fixture data, loaded once at startup behind the `--seed` flag.
//!
//! The fixtures live in the relational store like any other rows; nothing
//! is held in process-wide mutable state.

use rusqlite::params;

use crate::auth::passwords;
use crate::state::DbPool;

struct SeedUser {
    username: &'static str,
    email: &'static str,
    password: &'static str,
    first_name: &'static str,
    last_name: &'static str,
    role: &'static str,
}

const SEED_USERS: &[SeedUser] = &[
    SeedUser {
        username: "demo",
        email: "demo@commons.local",
        password: "demo-pass",
        first_name: "Demo",
        last_name: "Student",
        role: "member",
    },
    SeedUser {
        username: "dean",
        email: "dean@commons.local",
        password: "dean-pass",
        first_name: "Dana",
        last_name: "Dean",
        role: "admin",
    },
];

const SEED_COMMUNITIES: &[(&str, &str, &str)] = &[
    ("Study Groups", "Find people to study with", "academic"),
    ("Intramural Sports", "Pickup games and team signups", "social"),
];

/// Insert demo users and communities if the users table is empty.
/// Idempotent: a populated database is left untouched.
pub fn load(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;

    let user_count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    if user_count > 0 {
        tracing::info!("Database already has users, skipping seed");
        return Ok(());
    }

    let mut first_user_id = None;
    for user in SEED_USERS {
        let id = uuid::Uuid::now_v7().to_string();
        let hash = passwords::hash(user.password)?;
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, role, first_name, last_name) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                user.username,
                user.email,
                hash,
                user.role,
                user.first_name,
                user.last_name
            ],
        )?;
        first_user_id.get_or_insert(id);
    }

    let creator = first_user_id.expect("seed user list is non-empty");
    for (name, description, community_type) in SEED_COMMUNITIES {
        let id = uuid::Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO communities (id, name, description, community_type, created_by) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, name, description, community_type, creator],
        )?;
        conn.execute(
            "INSERT INTO memberships (user_id, community_id) VALUES (?1, ?2)",
            params![creator, id],
        )?;
    }

    tracing::info!(
        "Seeded {} users and {} communities",
        SEED_USERS.len(),
        SEED_COMMUNITIES.len()
    );
    Ok(())
}
