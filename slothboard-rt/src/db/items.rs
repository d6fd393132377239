//! Board item table access
//!
//! All writes that act on a client assumption go through [`cas_update`]:
//! the row mutates only when the caller's expected version matches, so a
//! concurrent writer on another channel surfaces as zero affected rows
//! rather than a silent lost update.

use chrono::{DateTime, Utc};
use slothboard_common::model::BoardStatus;
use slothboard_common::{BoardItem, Error, Result};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

fn status_str(status: BoardStatus) -> &'static str {
    match status {
        BoardStatus::Backlog => "backlog",
        BoardStatus::InProgress => "in_progress",
        BoardStatus::Done => "done",
    }
}

fn parse_status(s: &str) -> Result<BoardStatus> {
    match s {
        "backlog" => Ok(BoardStatus::Backlog),
        "in_progress" => Ok(BoardStatus::InProgress),
        "done" => Ok(BoardStatus::Done),
        other => Err(Error::Internal(format!("unknown board status '{other}'"))),
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Internal(format!("corrupt uuid column: {e}")))
}

type ItemRow = (
    String,
    String,
    String,
    String,
    Option<i64>,
    Option<String>,
    Option<String>,
    i64,
    DateTime<Utc>,
);

fn from_row(row: ItemRow) -> Result<BoardItem> {
    Ok(BoardItem {
        id: parse_uuid(&row.0)?,
        board_id: parse_uuid(&row.1)?,
        title: row.2,
        status: parse_status(&row.3)?,
        estimate: row.4.map(|v| v as u32),
        parent_id: row.5.as_deref().map(parse_uuid).transpose()?,
        assignee: row.6.as_deref().map(parse_uuid).transpose()?,
        version: row.7,
        updated_at: row.8,
    })
}

const SELECT_COLS: &str =
    "id, board_id, title, status, estimate, parent_id, assignee, version, updated_at";

/// Insert a new item at version 1
pub async fn create(pool: &Pool<Sqlite>, item: &BoardItem) -> Result<()> {
    sqlx::query(
        "INSERT INTO board_items
         (id, board_id, title, status, estimate, parent_id, assignee, version, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(item.id.to_string())
    .bind(item.board_id.to_string())
    .bind(&item.title)
    .bind(status_str(item.status))
    .bind(item.estimate.map(|v| v as i64))
    .bind(item.parent_id.map(|id| id.to_string()))
    .bind(item.assignee.map(|id| id.to_string()))
    .bind(item.version)
    .bind(item.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load one item by id
pub async fn get(pool: &Pool<Sqlite>, id: Uuid) -> Result<Option<BoardItem>> {
    let row = sqlx::query_as::<_, ItemRow>(&format!(
        "SELECT {SELECT_COLS} FROM board_items WHERE id = ?"
    ))
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(from_row).transpose()
}

/// All items on one board, stable order
pub async fn for_board(pool: &Pool<Sqlite>, board_id: Uuid) -> Result<Vec<BoardItem>> {
    let rows = sqlx::query_as::<_, ItemRow>(&format!(
        "SELECT {SELECT_COLS} FROM board_items WHERE board_id = ? ORDER BY updated_at, id"
    ))
    .bind(board_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(from_row).collect()
}

/// Fields a conditional update may change
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub status: Option<BoardStatus>,
    /// `Some(None)` clears the assignee
    pub assignee: Option<Option<Uuid>>,
    pub estimate: Option<u32>,
}

/// Version-checked compare-and-swap update
///
/// Applies the patch and bumps the version only if the stored version
/// still equals `expected_version`. Returns the updated row on success,
/// `None` when the version check lost.
pub async fn cas_update(
    pool: &Pool<Sqlite>,
    id: Uuid,
    expected_version: i64,
    patch: &ItemPatch,
) -> Result<Option<BoardItem>> {
    let mut sets = vec!["version = version + 1".to_string(), "updated_at = ?".to_string()];
    if patch.status.is_some() {
        sets.push("status = ?".to_string());
    }
    if patch.assignee.is_some() {
        sets.push("assignee = ?".to_string());
    }
    if patch.estimate.is_some() {
        sets.push("estimate = ?".to_string());
    }

    let sql = format!(
        "UPDATE board_items SET {} WHERE id = ? AND version = ?",
        sets.join(", ")
    );

    let mut query = sqlx::query(&sql).bind(Utc::now());
    if let Some(status) = patch.status {
        query = query.bind(status_str(status));
    }
    if let Some(assignee) = &patch.assignee {
        query = query.bind(assignee.map(|id| id.to_string()));
    }
    if let Some(estimate) = patch.estimate {
        query = query.bind(estimate as i64);
    }

    let result = query
        .bind(id.to_string())
        .bind(expected_version)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }

    get(pool, id).await
}

/// Unconditional estimate write used by session finalize
///
/// Finalize does not act on a client version assumption, but it still
/// bumps the version so any in-flight optimistic drag against the old
/// version is rejected and rolled back.
pub async fn set_estimate(pool: &Pool<Sqlite>, id: Uuid, estimate: u32) -> Result<BoardItem> {
    sqlx::query(
        "UPDATE board_items SET estimate = ?, version = version + 1, updated_at = ?
         WHERE id = ?",
    )
    .bind(estimate as i64)
    .bind(Utc::now())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    get(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("board item {id}")))
}
