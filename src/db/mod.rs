use anyhow::Result;
use sqlx::SqlitePool;

use crate::models::CachePointer;

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_pointers (
            key TEXT PRIMARY KEY,
            blob_path TEXT NOT NULL,
            episode_count INTEGER NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS trakt_tokens (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            access_token TEXT NOT NULL,
            refresh_token TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )
    .execute(pool)
    .await?;

    tracing::debug!("Database migrations complete");
    Ok(())
}

/// Read the pointer record for a cache key, if one has ever been published.
pub async fn read_pointer(pool: &SqlitePool, key: &str) -> Result<Option<CachePointer>> {
    let pointer = sqlx::query_as("SELECT * FROM cache_pointers WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(pointer)
}

/// Rewrite the pointer record for a cache key (last-write-wins). Returns the
/// blob path the pointer previously referenced so the caller can clean up
/// the superseded payload.
pub async fn write_pointer(
    pool: &SqlitePool,
    key: &str,
    blob_path: &str,
    episode_count: i64,
) -> Result<Option<String>> {
    let previous: Option<(String,)> =
        sqlx::query_as("SELECT blob_path FROM cache_pointers WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    sqlx::query(
        "INSERT OR REPLACE INTO cache_pointers (key, blob_path, episode_count, updated_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(key)
    .bind(blob_path)
    .bind(episode_count)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(previous.map(|(path,)| path))
}

/// Load the persisted Trakt token pair, if the client has ever rotated one.
pub async fn load_tokens(pool: &SqlitePool) -> Result<Option<(String, String)>> {
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT access_token, refresh_token FROM trakt_tokens WHERE id = 1")
            .fetch_optional(pool)
            .await?;
    Ok(row)
}

/// Persist a rotated Trakt token pair so it survives a restart.
pub async fn save_tokens(pool: &SqlitePool, access_token: &str, refresh_token: &str) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO trakt_tokens (id, access_token, refresh_token, updated_at)
         VALUES (1, ?, ?, ?)",
    )
    .bind(access_token)
    .bind(refresh_token)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}
