//! Event types for the Slothboard realtime channels
//!
//! Every state-changing operation commits first, then emits exactly one
//! event on its channel. Events are broadcast through the hub and can be
//! serialized for SSE transmission inside an [`EventFrame`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{BoardItem, Vote, VoteTally, VoterIdentity, VotingSession};

/// Broadcast scope: one estimation session or one board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    Session(Uuid),
    Board(Uuid),
}

impl ChannelId {
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            ChannelId::Session(id) => Some(*id),
            ChannelId::Board(_) => None,
        }
    }

    pub fn board_id(&self) -> Option<Uuid> {
        match self {
            ChannelId::Board(id) => Some(*id),
            ChannelId::Session(_) => None,
        }
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelId::Session(id) => write!(f, "session:{id}"),
            ChannelId::Board(id) => write!(f, "board:{id}"),
        }
    }
}

/// Slothboard event catalogue
///
/// Events are committed-state deltas: the authoritative store already
/// reflects what an event describes by the time subscribers see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BoardEvent {
    /// A new estimation session started for a board item
    SessionCreated {
        session: VotingSession,
        timestamp: DateTime<Utc>,
    },

    /// Someone cast a vote
    ///
    /// Carries who voted and the updated participant count, never the
    /// value: vote values stay hidden until `VotesRevealed`.
    VoteReceived {
        session_id: Uuid,
        voter: VoterIdentity,
        vote_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Moderator revealed the votes; full ledger plus derived tally
    VotesRevealed {
        session_id: Uuid,
        votes: Vec<Vote>,
        tally: VoteTally,
        timestamp: DateTime<Utc>,
    },

    /// Session closed, either by finalize (with an estimate) or by the
    /// idle reaper (without one)
    SessionClosed {
        session_id: Uuid,
        board_item_id: Uuid,
        estimate: Option<u32>,
        timestamp: DateTime<Utc>,
    },

    /// A board mutation was confirmed; `item` is the new authoritative state
    BoardItemMutated {
        item: BoardItem,
        timestamp: DateTime<Utc>,
    },

    /// A proposed mutation was rejected; `item` is the last confirmed
    /// state every optimistic observer must revert to
    BoardItemRollback {
        item: BoardItem,
        /// Stable error code explaining the rejection
        reason: String,
        /// Client request id of the rejected proposal, if supplied
        request_id: Option<Uuid>,
        timestamp: DateTime<Utc>,
    },

    /// Full session state, delivered first to every new session subscriber
    ///
    /// `votes` is populated only once the session is revealed; while
    /// collecting, only the voter identities are visible.
    SessionSnapshot {
        session: VotingSession,
        voters: Vec<VoterIdentity>,
        votes: Option<Vec<Vote>>,
        tally: Option<VoteTally>,
        timestamp: DateTime<Utc>,
    },

    /// Full board state, delivered first to every new board subscriber
    BoardSnapshot {
        board_id: Uuid,
        items: Vec<BoardItem>,
        timestamp: DateTime<Utc>,
    },
}

impl BoardEvent {
    /// Event type name, used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            BoardEvent::SessionCreated { .. } => "SessionCreated",
            BoardEvent::VoteReceived { .. } => "VoteReceived",
            BoardEvent::VotesRevealed { .. } => "VotesRevealed",
            BoardEvent::SessionClosed { .. } => "SessionClosed",
            BoardEvent::BoardItemMutated { .. } => "BoardItemMutated",
            BoardEvent::BoardItemRollback { .. } => "BoardItemRollback",
            BoardEvent::SessionSnapshot { .. } => "SessionSnapshot",
            BoardEvent::BoardSnapshot { .. } => "BoardSnapshot",
        }
    }
}

/// Wire envelope for one delivered event
///
/// `server_seq` is the per-channel monotonic commit sequence; clients use
/// it to detect and ignore out-of-order or duplicate deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board_id: Option<Uuid>,
    pub server_seq: u64,
    #[serde(flatten)]
    pub payload: BoardEvent,
}

impl EventFrame {
    pub fn new(channel: ChannelId, server_seq: u64, payload: BoardEvent) -> Self {
        Self {
            session_id: channel.session_id(),
            board_id: channel.board_id(),
            server_seq,
            payload,
        }
    }

    pub fn channel(&self) -> ChannelId {
        match (self.session_id, self.board_id) {
            (Some(id), _) => ChannelId::Session(id),
            (None, Some(id)) => ChannelId::Board(id),
            // Constructed only via new(), so one side is always set
            (None, None) => unreachable!("event frame without a channel"),
        }
    }
}
