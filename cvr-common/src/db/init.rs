//! Database initialization
//!
//! Creates the tables the finalization subsystem reads and writes. Every
//! statement is idempotent, so initialization runs on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open (creating if needed) the database file and ensure the schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers alongside the single writer
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database with the full schema
///
/// The connection is never recycled, since an in-memory database lives
/// and dies with its connection.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables and indexes if missing
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversation_responses (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            interview_type TEXT NOT NULL DEFAULT '',
            conversation_plan TEXT NOT NULL DEFAULT '',
            start_time TEXT,
            end_time TEXT,
            duration_minutes INTEGER,
            raw_messages TEXT NOT NULL DEFAULT '[]',
            clean_transcript TEXT,
            completion_status TEXT NOT NULL DEFAULT 'not_started'
                CHECK (completion_status IN ('not_started', 'in_progress', 'completed')),
            completion_percentage INTEGER NOT NULL DEFAULT 0
                CHECK (completion_percentage BETWEEN 0 AND 100),
            agent_progress REAL,
            user_word_count INTEGER NOT NULL DEFAULT 0,
            summary TEXT,
            finalized_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS profiles (
            user_id TEXT PRIMARY KEY,
            responses_used INTEGER NOT NULL DEFAULT 0,
            minutes_used INTEGER NOT NULL DEFAULT 0,
            response_quota INTEGER NOT NULL DEFAULT 100,
            minute_quota INTEGER NOT NULL DEFAULT 1000
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per billed finalization; the primary key makes billing idempotent
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS usage_events (
            response_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            minutes INTEGER NOT NULL,
            recorded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_usage_events_user ON usage_events(user_id)")
        .execute(pool)
        .await?;

    info!("Database schema ready (conversation_responses, profiles, usage_events)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let pool = init_memory_database().await.unwrap();
        create_schema(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<_> = tables.into_iter().map(|(n,)| n).collect();
        assert_eq!(names, vec!["conversation_responses", "profiles", "usage_events"]);
    }

    #[tokio::test]
    async fn test_percentage_check_constraint() {
        let pool = init_memory_database().await.unwrap();
        let result = sqlx::query(
            "INSERT INTO conversation_responses (id, owner_id, completion_percentage) VALUES ('r', 'u', 101)",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_init_database_creates_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cvr.db");
        let pool = init_database(&path).await.unwrap();
        assert!(path.exists());
        pool.close().await;
    }
}
