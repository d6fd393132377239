//! Database access layer
//!
//! One file per table, free async functions over a shared sqlite pool.
//! The store provides the two guarantees the realtime core leans on:
//! a unique index enforcing one vote per (session, voter), and
//! version-checked conditional updates on board items.

pub mod guests;
pub mod items;
pub mod sessions;
pub mod votes;

use slothboard_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::info;

/// Open (creating if needed) the sqlite database and ensure the schema
pub async fn connect(path: &Path) -> Result<Pool<Sqlite>> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    info!("Database ready at {}", path.display());
    Ok(pool)
}

/// In-memory database for tests
pub async fn connect_in_memory() -> Result<Pool<Sqlite>> {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);

    // A single connection: every handle sees the same in-memory db
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

/// Create tables and indexes if missing
pub async fn init_schema(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS voting_sessions (
            id TEXT PRIMARY KEY,
            board_item_id TEXT NOT NULL,
            moderator TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            revealed_at TEXT,
            last_activity_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS votes (
            session_id TEXT NOT NULL,
            voter_key TEXT NOT NULL,
            voter TEXT NOT NULL,
            value INTEGER NOT NULL,
            request_id TEXT,
            cast_at TEXT NOT NULL,
            PRIMARY KEY (session_id, voter_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS guest_voters (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            avatar TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS board_items (
            id TEXT PRIMARY KEY,
            board_id TEXT NOT NULL,
            title TEXT NOT NULL,
            status TEXT NOT NULL,
            estimate INTEGER,
            parent_id TEXT,
            assignee TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sessions_item_status
         ON voting_sessions (board_item_id, status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_items_board ON board_items (board_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
