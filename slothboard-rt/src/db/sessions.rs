//! Voting session table access

use chrono::{DateTime, Utc};
use slothboard_common::model::SessionStatus;
use slothboard_common::{Error, Result, VoterIdentity, VotingSession};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

fn status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Collecting => "collecting",
        SessionStatus::Revealed => "revealed",
        SessionStatus::Closed => "closed",
    }
}

fn parse_status(s: &str) -> Result<SessionStatus> {
    match s {
        "collecting" => Ok(SessionStatus::Collecting),
        "revealed" => Ok(SessionStatus::Revealed),
        "closed" => Ok(SessionStatus::Closed),
        other => Err(Error::Internal(format!("unknown session status '{other}'"))),
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Internal(format!("corrupt uuid column: {e}")))
}

type SessionRow = (
    String,
    String,
    String,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

fn from_row(row: SessionRow) -> Result<VotingSession> {
    let moderator: VoterIdentity = serde_json::from_str(&row.2)
        .map_err(|e| Error::Internal(format!("corrupt moderator column: {e}")))?;
    Ok(VotingSession {
        id: parse_uuid(&row.0)?,
        board_item_id: parse_uuid(&row.1)?,
        moderator,
        status: parse_status(&row.3)?,
        created_at: row.4,
        revealed_at: row.5,
    })
}

/// Insert a new session row
pub async fn create(pool: &Pool<Sqlite>, session: &VotingSession) -> Result<()> {
    let moderator = serde_json::to_string(&session.moderator)
        .map_err(|e| Error::Internal(e.to_string()))?;

    sqlx::query(
        "INSERT INTO voting_sessions
         (id, board_item_id, moderator, status, created_at, revealed_at, last_activity_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(session.id.to_string())
    .bind(session.board_item_id.to_string())
    .bind(moderator)
    .bind(status_str(session.status))
    .bind(session.created_at)
    .bind(session.revealed_at)
    .bind(session.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load one session by id
pub async fn get(pool: &Pool<Sqlite>, id: Uuid) -> Result<Option<VotingSession>> {
    let row = sqlx::query_as::<_, SessionRow>(
        "SELECT id, board_item_id, moderator, status, created_at, revealed_at
         FROM voting_sessions WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(from_row).transpose()
}

/// Id of the collecting session for a board item, if one exists
pub async fn collecting_for_item(pool: &Pool<Sqlite>, item_id: Uuid) -> Result<Option<Uuid>> {
    let id = sqlx::query_scalar::<_, String>(
        "SELECT id FROM voting_sessions
         WHERE board_item_id = ? AND status = 'collecting'",
    )
    .bind(item_id.to_string())
    .fetch_optional(pool)
    .await?;

    id.as_deref().map(parse_uuid).transpose()
}

/// Transition a collecting session to revealed
pub async fn mark_revealed(pool: &Pool<Sqlite>, id: Uuid, at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        "UPDATE voting_sessions
         SET status = 'revealed', revealed_at = ?, last_activity_at = ?
         WHERE id = ?",
    )
    .bind(at)
    .bind(at)
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Transition a session to closed
pub async fn mark_closed(pool: &Pool<Sqlite>, id: Uuid, at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        "UPDATE voting_sessions SET status = 'closed', last_activity_at = ? WHERE id = ?",
    )
    .bind(at)
    .bind(id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Record session activity (vote cast) for the idle reaper
pub async fn touch(pool: &Pool<Sqlite>, id: Uuid, at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE voting_sessions SET last_activity_at = ? WHERE id = ?")
        .bind(at)
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Collecting sessions idle since before `cutoff`
pub async fn stale_collecting(
    pool: &Pool<Sqlite>,
    cutoff: DateTime<Utc>,
) -> Result<Vec<VotingSession>> {
    let rows = sqlx::query_as::<_, SessionRow>(
        "SELECT id, board_item_id, moderator, status, created_at, revealed_at
         FROM voting_sessions
         WHERE status = 'collecting' AND last_activity_at < ?",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(from_row).collect()
}
