//! Core data model for estimation sessions and board items
//!
//! `VoterIdentity` is the tagged union every consumer must match
//! exhaustively: a voter is either an authenticated member or a
//! session-scoped guest, never both and never neither.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Permitted estimation values (Fibonacci planning-poker deck)
pub const POINT_SCALE: [u32; 8] = [1, 2, 3, 5, 8, 13, 21, 34];

/// Whether a vote value is on the permitted point scale
pub fn on_point_scale(value: u32) -> bool {
    POINT_SCALE.contains(&value)
}

/// Member role within a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Project manager; may moderate estimation sessions
    Pm,
    Developer,
}

/// Avatar choice offered on the guest join form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Avatar {
    #[default]
    #[serde(rename = "sloth-default")]
    Default,
    #[serde(rename = "sloth-happy")]
    Happy,
    #[serde(rename = "sloth-sleepy")]
    Sleepy,
    #[serde(rename = "sloth-cool")]
    Cool,
    #[serde(rename = "sloth-heart")]
    Heart,
    #[serde(rename = "sloth-star")]
    Star,
    #[serde(rename = "sloth-coffee")]
    Coffee,
    #[serde(rename = "sloth-zen")]
    Zen,
}

/// Uniform voter identity: authenticated member or ephemeral guest
///
/// Guests are minted once per session join and are never reused across
/// sessions, even with the same display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VoterIdentity {
    Member {
        member_id: Uuid,
        role: Role,
        display_name: String,
    },
    Guest {
        guest_id: Uuid,
        display_name: String,
        avatar: Avatar,
    },
}

impl VoterIdentity {
    /// Stable uniqueness key for the vote ledger
    ///
    /// Member ids are namespaced apart from guest ids so a collision
    /// between the two id spaces can never merge two voters.
    pub fn voter_key(&self) -> String {
        match self {
            VoterIdentity::Member { member_id, .. } => format!("member:{member_id}"),
            VoterIdentity::Guest { guest_id, .. } => format!("guest:{guest_id}"),
        }
    }

    /// Display name for presence lists
    pub fn display_name(&self) -> &str {
        match self {
            VoterIdentity::Member { display_name, .. } => display_name,
            VoterIdentity::Guest { display_name, .. } => display_name,
        }
    }

    /// Whether this identity may moderate (reveal/finalize) sessions it created
    pub fn is_member(&self) -> bool {
        matches!(self, VoterIdentity::Member { .. })
    }
}

/// Lifecycle status of an estimation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accepting votes (initial state)
    Collecting,
    /// Votes revealed; awaiting a final estimate
    Revealed,
    /// Final estimate written (or session reaped); terminal
    Closed,
}

/// One bounded estimation round tied to a single board item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingSession {
    pub id: Uuid,
    pub board_item_id: Uuid,
    /// Identity permitted to reveal and finalize
    pub moderator: VoterIdentity,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub revealed_at: Option<DateTime<Utc>>,
}

/// A single cast vote; write-once while the session is collecting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub session_id: Uuid,
    pub voter: VoterIdentity,
    pub value: u32,
    pub cast_at: DateTime<Utc>,
}

/// Board column a task or subtask sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardStatus {
    Backlog,
    InProgress,
    Done,
}

/// A task or subtask on the kanban board
///
/// `version` is the server-confirmed counter used to detect stale client
/// proposals; it bumps on every confirmed mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardItem {
    pub id: Uuid,
    pub board_id: Uuid,
    pub title: String,
    pub status: BoardStatus,
    /// Final estimate in story points, if assigned
    pub estimate: Option<u32>,
    /// Parent story id for subtasks; subtasks only move within their parent's lanes
    pub parent_id: Option<Uuid>,
    pub assignee: Option<Uuid>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// Derived view over a session's ledger; recomputed on demand, never stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteTally {
    pub count: usize,
    /// Arithmetic mean rounded to one decimal place; 0.0 when no votes
    pub average: f64,
    /// (value, occurrences) sorted by value
    pub histogram: Vec<(u32, usize)>,
    /// True iff more than one vote and all values identical
    pub consensus: bool,
}

impl VoteTally {
    /// Compute the tally from raw vote values
    pub fn compute(values: &[u32]) -> Self {
        let count = values.len();
        let average = if count == 0 {
            0.0
        } else {
            let sum: u64 = values.iter().map(|&v| u64::from(v)).sum();
            (sum as f64 / count as f64 * 10.0).round() / 10.0
        };

        let mut histogram: Vec<(u32, usize)> = Vec::new();
        let mut sorted = values.to_vec();
        sorted.sort_unstable();
        for v in sorted {
            match histogram.last_mut() {
                Some((value, n)) if *value == v => *n += 1,
                _ => histogram.push((v, 1)),
            }
        }

        let consensus = count > 1 && histogram.len() == 1;

        Self {
            count,
            average,
            histogram,
            consensus,
        }
    }
}
