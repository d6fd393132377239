//! Vote ledger table access
//!
//! The ledger is append-only: votes are inserted, never updated. The
//! primary key on (session_id, voter_key) is what makes the
//! one-vote-per-identity invariant hold even under concurrent casts.

use chrono::{DateTime, Utc};
use slothboard_common::{Error, Result, Vote, VoterIdentity};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

/// Outcome of an insert attempt
pub enum InsertOutcome {
    /// Vote recorded
    Inserted,
    /// A vote by this identity already exists; carries its request id
    AlreadyVoted { request_id: Option<Uuid> },
}

/// Append a vote; reports a conflict instead of overwriting
pub async fn insert(
    pool: &Pool<Sqlite>,
    vote: &Vote,
    request_id: Option<Uuid>,
) -> Result<InsertOutcome> {
    let voter = serde_json::to_string(&vote.voter)
        .map_err(|e| Error::Internal(e.to_string()))?;

    let result = sqlx::query(
        "INSERT OR IGNORE INTO votes
         (session_id, voter_key, voter, value, request_id, cast_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(vote.session_id.to_string())
    .bind(vote.voter.voter_key())
    .bind(voter)
    .bind(vote.value as i64)
    .bind(request_id.map(|id| id.to_string()))
    .bind(vote.cast_at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(InsertOutcome::Inserted);
    }

    // Lost to an existing row; fetch its request id for idempotency checks
    let existing = sqlx::query_scalar::<_, Option<String>>(
        "SELECT request_id FROM votes WHERE session_id = ? AND voter_key = ?",
    )
    .bind(vote.session_id.to_string())
    .bind(vote.voter.voter_key())
    .fetch_one(pool)
    .await?;

    let request_id = existing
        .as_deref()
        .map(Uuid::parse_str)
        .transpose()
        .map_err(|e| Error::Internal(format!("corrupt request_id column: {e}")))?;

    Ok(InsertOutcome::AlreadyVoted { request_id })
}

/// All votes for a session, oldest first
pub async fn for_session(pool: &Pool<Sqlite>, session_id: Uuid) -> Result<Vec<Vote>> {
    let rows = sqlx::query_as::<_, (String, i64, DateTime<Utc>)>(
        "SELECT voter, value, cast_at FROM votes
         WHERE session_id = ? ORDER BY cast_at, voter_key",
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(voter, value, cast_at)| {
            let voter: VoterIdentity = serde_json::from_str(&voter)
                .map_err(|e| Error::Internal(format!("corrupt voter column: {e}")))?;
            Ok(Vote {
                session_id,
                voter,
                value: value as u32,
                cast_at,
            })
        })
        .collect()
}
