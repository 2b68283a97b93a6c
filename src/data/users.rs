//! Database operations for the `users` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;
use ts_rs::TS;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// The user shape exposed over the API (no hash).
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct PublicUser {
    pub id: i32,
    pub username: String,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        PublicUser {
            id: user.id,
            username: user.username.clone(),
        }
    }
}

pub async fn find_by_username(pool: &PgPool, username: &str) -> Result<Option<User>> {
    sqlx::query_as::<_, User>(
        "SELECT id, username, password_hash, created_at FROM users WHERE username = $1",
    )
    .bind(username)
    .fetch_optional(pool)
    .await
    .context("failed to fetch user")
}

/// Create the configured admin user if it does not exist yet. The password
/// is hashed here; an existing user's hash is never overwritten.
pub async fn ensure_seed_admin(pool: &PgPool, username: &str, password: &str) -> Result<User> {
    if let Some(user) = find_by_username(pool, username).await? {
        return Ok(user);
    }

    let password = password.to_owned();
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(&password, bcrypt::DEFAULT_COST))
        .await
        .context("password hashing task failed")?
        .context("failed to hash seed password")?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (username, password_hash)
        VALUES ($1, $2)
        ON CONFLICT (username) DO UPDATE SET username = EXCLUDED.username
        RETURNING id, username, password_hash, created_at
        "#,
    )
    .bind(username)
    .bind(&hash)
    .fetch_one(pool)
    .await
    .context("failed to insert seed user")?;

    info!(username = %user.username, "seed user created");
    Ok(user)
}
