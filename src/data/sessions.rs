//! Database operations for the `sessions` table (bearer-token sessions).

use crate::data::users::User;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub async fn create(
    pool: &PgPool,
    token: &str,
    user_id: i32,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .execute(pool)
        .await
        .context("failed to create session")?;
    Ok(())
}

/// Resolve a token to its user, ignoring expired sessions.
pub async fn find_user_by_token(pool: &PgPool, token: &str) -> Result<Option<User>> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT u.id, u.username, u.password_hash, u.created_at
        FROM sessions s
        JOIN users u ON u.id = s.user_id
        WHERE s.token = $1 AND s.expires_at > now()
        "#,
    )
    .bind(token)
    .fetch_optional(pool)
    .await
    .context("failed to resolve session token")
}

pub async fn delete(pool: &PgPool, token: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM sessions WHERE token = $1")
        .bind(token)
        .execute(pool)
        .await
        .context("failed to delete session")?;
    Ok(result.rows_affected() > 0)
}

/// Remove expired sessions; returns how many were purged.
pub async fn purge_expired(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= now()")
        .execute(pool)
        .await
        .context("failed to purge expired sessions")?;
    Ok(result.rows_affected())
}
