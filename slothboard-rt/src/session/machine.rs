//! Session state machine
//!
//! Owns the `collecting → revealed → closed` lifecycle of estimation
//! sessions. All mutations for one session funnel through that session's
//! single writer task, so commit order and broadcast order agree without
//! any further locking; different sessions proceed fully in parallel.

use chrono::Utc;
use slothboard_common::model::{on_point_scale, SessionStatus};
use slothboard_common::{
    BoardEvent, BoardItem, ChannelId, Error, ErrorClass, Result, Vote, VoterIdentity,
    VotingSession,
};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{error, info};
use uuid::Uuid;

use crate::board::MutationCoordinator;
use crate::db;
use crate::hub::BroadcastHub;
use crate::session::VoteLedger;

/// Commands processed by a session's writer task
enum Command {
    Cast {
        identity: VoterIdentity,
        value: u32,
        request_id: Option<Uuid>,
        reply: oneshot::Sender<Result<()>>,
    },
    Reveal {
        requester: VoterIdentity,
        reply: oneshot::Sender<Result<Vec<Vote>>>,
    },
    Finalize {
        requester: VoterIdentity,
        value: u32,
        reply: oneshot::Sender<Result<BoardItem>>,
    },
    /// Idle reaper: close a stale collecting session without an estimate
    Expire {
        reply: oneshot::Sender<Result<bool>>,
    },
}

/// Estimation session service
///
/// One writer task per live session; requests block until that writer
/// has produced a commit-or-reject decision.
pub struct SessionService {
    pool: Pool<Sqlite>,
    hub: Arc<BroadcastHub>,
    /// Finalized estimates are board mutations and go through the
    /// board's writer, never directly to the board channel
    boards: Arc<MutationCoordinator>,
    writers: Mutex<HashMap<Uuid, mpsc::Sender<Command>>>,
    queue_depth: usize,
    /// Serializes create_session's exists-check-then-insert
    create_lock: Mutex<()>,
}

impl SessionService {
    pub fn new(
        pool: Pool<Sqlite>,
        hub: Arc<BroadcastHub>,
        boards: Arc<MutationCoordinator>,
        queue_depth: usize,
    ) -> Self {
        Self {
            pool,
            hub,
            boards,
            writers: Mutex::new(HashMap::new()),
            queue_depth,
            create_lock: Mutex::new(()),
        }
    }

    /// Start a new estimation session for a board item
    ///
    /// Fails with `SessionAlreadyActive` if a collecting session already
    /// exists for that item.
    pub async fn create_session(
        &self,
        board_item_id: Uuid,
        moderator: VoterIdentity,
    ) -> Result<VotingSession> {
        let _guard = self.create_lock.lock().await;

        db::items::get(&self.pool, board_item_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("board item {board_item_id}")))?;

        if db::sessions::collecting_for_item(&self.pool, board_item_id)
            .await?
            .is_some()
        {
            return Err(Error::SessionAlreadyActive(board_item_id));
        }

        let session = VotingSession {
            id: Uuid::new_v4(),
            board_item_id,
            moderator,
            status: SessionStatus::Collecting,
            created_at: Utc::now(),
            revealed_at: None,
        };
        db::sessions::create(&self.pool, &session).await?;
        info!("Session {} created for item {}", session.id, board_item_id);

        self.hub
            .publish(
                ChannelId::Session(session.id),
                BoardEvent::SessionCreated {
                    session: session.clone(),
                    timestamp: Utc::now(),
                },
            )
            .await;

        Ok(session)
    }

    /// Cast one vote; idempotent per client `request_id`
    pub async fn cast_vote(
        &self,
        session_id: Uuid,
        identity: VoterIdentity,
        value: u32,
        request_id: Option<Uuid>,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(
            session_id,
            Command::Cast {
                identity,
                value,
                request_id,
                reply,
            },
        )
        .await?;
        rx.await.map_err(|_| Error::Internal("session writer gone".into()))?
    }

    /// Reveal the votes; moderator only. Returns the frozen ledger.
    pub async fn reveal(
        &self,
        session_id: Uuid,
        requester: VoterIdentity,
    ) -> Result<Vec<Vote>> {
        let (reply, rx) = oneshot::channel();
        self.send(session_id, Command::Reveal { requester, reply }).await?;
        rx.await.map_err(|_| Error::Internal("session writer gone".into()))?
    }

    /// Write the chosen estimate to the board item and close the session
    pub async fn finalize(
        &self,
        session_id: Uuid,
        requester: VoterIdentity,
        value: u32,
    ) -> Result<BoardItem> {
        let (reply, rx) = oneshot::channel();
        self.send(
            session_id,
            Command::Finalize {
                requester,
                value,
                reply,
            },
        )
        .await?;
        let result = rx
            .await
            .map_err(|_| Error::Internal("session writer gone".into()))?;
        if result.is_ok() {
            // Session is closed; its writer has nothing more to do
            self.retire_writer(session_id).await;
        }
        result
    }

    /// Close an idle collecting session with no estimate
    ///
    /// Returns true if the session was actually expired.
    pub async fn expire(&self, session_id: Uuid) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        match self.send(session_id, Command::Expire { reply }).await {
            Ok(()) => {}
            // Closed out from under the reaper between query and expire
            Err(Error::SessionClosed(_)) => return Ok(false),
            Err(e) => return Err(e),
        }
        let expired = rx
            .await
            .map_err(|_| Error::Internal("session writer gone".into()))?;
        if let Ok(true) = expired {
            self.retire_writer(session_id).await;
        }
        expired
    }

    /// Look up or spawn the session's writer
    ///
    /// A writer is only spawned for sessions that exist and are still
    /// open, so unknown or closed session ids never leave a task and
    /// its channel behind.
    async fn sender_for(&self, session_id: Uuid) -> Result<mpsc::Sender<Command>> {
        if let Some(tx) = self.writers.lock().await.get(&session_id) {
            return Ok(tx.clone());
        }

        let session = load_session(&self.pool, session_id).await?;
        if session.status == SessionStatus::Closed {
            return Err(Error::SessionClosed(session_id));
        }

        let mut writers = self.writers.lock().await;
        let tx = writers
            .entry(session_id)
            .or_insert_with(|| {
                spawn_writer(
                    self.pool.clone(),
                    self.hub.clone(),
                    self.boards.clone(),
                    session_id,
                    self.queue_depth,
                )
            })
            .clone();
        Ok(tx)
    }

    /// Route a command to the session's writer
    async fn send(&self, session_id: Uuid, command: Command) -> Result<()> {
        let tx = self.sender_for(session_id).await?;
        // Send outside the registry lock: a full queue parks this
        // caller only, other sessions keep dispatching
        if tx.send(command).await.is_err() {
            // Writer task died; drop the stale handle. The caller sees a
            // transient-style failure and may retry with the same
            // request id.
            self.retire_writer(session_id).await;
            return Err(Error::Internal(format!(
                "session writer for {session_id} unavailable"
            )));
        }
        Ok(())
    }

    async fn retire_writer(&self, session_id: Uuid) {
        self.writers.lock().await.remove(&session_id);
    }
}

fn spawn_writer(
    pool: Pool<Sqlite>,
    hub: Arc<BroadcastHub>,
    boards: Arc<MutationCoordinator>,
    session_id: Uuid,
    queue_depth: usize,
) -> mpsc::Sender<Command> {
    let (tx, mut rx) = mpsc::channel::<Command>(queue_depth);

    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Cast {
                    identity,
                    value,
                    request_id,
                    reply,
                } => {
                    let result =
                        handle_cast(&pool, &hub, session_id, identity, value, request_id).await;
                    teardown_on_fatal(&hub, session_id, &result).await;
                    let _ = reply.send(result);
                }
                Command::Reveal { requester, reply } => {
                    let result = handle_reveal(&pool, &hub, session_id, requester).await;
                    teardown_on_fatal(&hub, session_id, &result).await;
                    let _ = reply.send(result);
                }
                Command::Finalize {
                    requester,
                    value,
                    reply,
                } => {
                    let result =
                        handle_finalize(&pool, &hub, &boards, session_id, requester, value).await;
                    teardown_on_fatal(&hub, session_id, &result).await;
                    let _ = reply.send(result);
                }
                Command::Expire { reply } => {
                    let result = handle_expire(&pool, &hub, session_id).await;
                    teardown_on_fatal(&hub, session_id, &result).await;
                    let _ = reply.send(result);
                }
            }
        }
    });

    tx
}

/// A fatal error means the channel's history can no longer be trusted;
/// disconnect every subscriber so they resync through fresh snapshots.
async fn teardown_on_fatal<T>(hub: &BroadcastHub, session_id: Uuid, result: &Result<T>) {
    if let Err(e) = result {
        if e.class() == ErrorClass::Fatal {
            error!("Fatal error on session {session_id}: {e}");
            hub.teardown(ChannelId::Session(session_id)).await;
        }
    }
}

async fn load_session(pool: &Pool<Sqlite>, session_id: Uuid) -> Result<VotingSession> {
    db::sessions::get(pool, session_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("session {session_id}")))
}

fn require_moderator(session: &VotingSession, requester: &VoterIdentity) -> Result<()> {
    if session.moderator.voter_key() != requester.voter_key() {
        return Err(Error::NotModerator);
    }
    Ok(())
}

async fn handle_cast(
    pool: &Pool<Sqlite>,
    hub: &BroadcastHub,
    session_id: Uuid,
    identity: VoterIdentity,
    value: u32,
    request_id: Option<Uuid>,
) -> Result<()> {
    let session = load_session(pool, session_id).await?;
    if session.status != SessionStatus::Collecting {
        return Err(Error::SessionClosed(session_id));
    }
    if !on_point_scale(value) {
        return Err(Error::InvalidValue(value));
    }

    let vote = Vote {
        session_id,
        voter: identity.clone(),
        value,
        cast_at: Utc::now(),
    };

    match db::votes::insert(pool, &vote, request_id).await? {
        db::votes::InsertOutcome::Inserted => {}
        db::votes::InsertOutcome::AlreadyVoted {
            request_id: existing,
        } => {
            // Same request id means a retried commit: already applied,
            // answer success without appending or re-broadcasting
            if request_id.is_some() && existing == request_id {
                return Ok(());
            }
            return Err(Error::DuplicateVote(session_id));
        }
    }

    db::sessions::touch(pool, session_id, vote.cast_at).await?;

    let ledger = VoteLedger::new(db::votes::for_session(pool, session_id).await?);
    hub.publish(
        ChannelId::Session(session_id),
        BoardEvent::VoteReceived {
            session_id,
            voter: identity,
            vote_count: ledger.len(),
            timestamp: vote.cast_at,
        },
    )
    .await;

    Ok(())
}

async fn handle_reveal(
    pool: &Pool<Sqlite>,
    hub: &BroadcastHub,
    session_id: Uuid,
    requester: VoterIdentity,
) -> Result<Vec<Vote>> {
    let session = load_session(pool, session_id).await?;
    require_moderator(&session, &requester)?;
    if session.status != SessionStatus::Collecting {
        return Err(Error::SessionClosed(session_id));
    }

    let now = Utc::now();
    db::sessions::mark_revealed(pool, session_id, now).await?;

    let ledger = VoteLedger::new(db::votes::for_session(pool, session_id).await?);
    let tally = ledger.tally();
    let votes = ledger.into_votes();
    info!(
        "Session {session_id} revealed: {} votes, consensus={}",
        votes.len(),
        tally.consensus
    );

    hub.publish(
        ChannelId::Session(session_id),
        BoardEvent::VotesRevealed {
            session_id,
            votes: votes.clone(),
            tally,
            timestamp: now,
        },
    )
    .await;

    Ok(votes)
}

async fn handle_finalize(
    pool: &Pool<Sqlite>,
    hub: &BroadcastHub,
    boards: &MutationCoordinator,
    session_id: Uuid,
    requester: VoterIdentity,
    value: u32,
) -> Result<BoardItem> {
    let session = load_session(pool, session_id).await?;
    require_moderator(&session, &requester)?;
    if session.status != SessionStatus::Revealed {
        return Err(Error::SessionClosed(session_id));
    }
    if value == 0 {
        // Moderator may pick any value, on scale or not, but zero is
        // "no estimate" and cannot be finalized
        return Err(Error::InvalidValue(value));
    }

    let current = db::items::get(pool, session.board_item_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("board item {}", session.board_item_id)))?;

    // The estimate write is a board mutation every board observer must
    // see; it commits on the board's writer so the board channel keeps
    // commit order against concurrent drags
    let item = boards
        .apply_estimate(current.board_id, current.id, value)
        .await?;

    let now = Utc::now();
    db::sessions::mark_closed(pool, session_id, now).await?;
    info!(
        "Session {session_id} finalized: item {} estimate={value}",
        item.id
    );

    hub.publish(
        ChannelId::Session(session_id),
        BoardEvent::SessionClosed {
            session_id,
            board_item_id: item.id,
            estimate: Some(value),
            timestamp: now,
        },
    )
    .await;

    Ok(item)
}

async fn handle_expire(
    pool: &Pool<Sqlite>,
    hub: &BroadcastHub,
    session_id: Uuid,
) -> Result<bool> {
    let session = load_session(pool, session_id).await?;
    if session.status != SessionStatus::Collecting {
        return Ok(false);
    }

    let now = Utc::now();
    db::sessions::mark_closed(pool, session_id, now).await?;
    info!("Idle session {session_id} reaped");

    hub.publish(
        ChannelId::Session(session_id),
        BoardEvent::SessionClosed {
            session_id,
            board_item_id: session.board_item_id,
            estimate: None,
            timestamp: now,
        },
    )
    .await;

    Ok(true)
}
