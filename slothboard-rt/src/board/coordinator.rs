//! Optimistic mutation coordinator
//!
//! Clients apply drags and assignments locally, then propose them here
//! with the item version their UI acted on. One writer task per board
//! decides; the decision is broadcast on the board channel as either a
//! `BoardItemMutated` confirmation or a `BoardItemRollback` carrying the
//! last-confirmed row, so every optimistic client converges on the same
//! state regardless of which side of the race it was on.

use chrono::Utc;
use serde::Deserialize;
use slothboard_common::model::BoardStatus;
use slothboard_common::{BoardEvent, BoardItem, ChannelId, Error, ErrorClass, Result};
use sqlx::{Pool, Sqlite};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db;
use crate::db::items::ItemPatch;
use crate::hub::BroadcastHub;

/// What a proposal wants to change on the item
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationChange {
    /// Move the item to another lane
    ///
    /// `lane_parent` names the epic the target lane belongs to; a child
    /// item may only move within its own parent's lanes.
    Move {
        status: BoardStatus,
        lane_parent: Option<Uuid>,
    },
    /// Reassign the item; `None` clears the assignee
    Assign { assignee: Option<Uuid> },
}

/// A client-proposed mutation with its optimistic base version
#[derive(Debug, Clone, Deserialize)]
pub struct MutationProposal {
    pub item_id: Uuid,
    pub base_version: i64,
    /// Client retry token; replays with the same id return the original
    /// outcome instead of re-applying
    pub request_id: Option<Uuid>,
    #[serde(flatten)]
    pub change: MutationChange,
}

/// The coordinator's decision, as returned to the proposing client
#[derive(Debug, Clone)]
pub enum MutationOutcome {
    /// Applied; the confirmed row at its new version
    Confirmed(BoardItem),
    /// Rejected; the last-confirmed row the client must revert to
    RolledBack {
        item: BoardItem,
        reason: RollbackReason,
    },
}

/// Why a proposal was rejected
#[derive(Debug, Clone, Copy)]
pub enum RollbackReason {
    StaleVersion { proposed: i64, current: i64 },
    CrossParentMove,
}

impl RollbackReason {
    /// Render as the shared error taxonomy for wire reporting
    pub fn to_error(self, item_id: Uuid) -> Error {
        match self {
            RollbackReason::StaleVersion { proposed, current } => Error::StaleVersion {
                item_id,
                proposed,
                current,
            },
            RollbackReason::CrossParentMove => Error::CrossParentMoveRejected(item_id),
        }
    }
}

/// Replayable outcomes remembered per writer before the oldest is evicted
const REPLAY_CACHE_MAX: usize = 256;

enum BoardCommand {
    Propose {
        proposal: MutationProposal,
        reply: oneshot::Sender<Result<MutationOutcome>>,
    },
    /// Estimate finalized by a voting session; unconditional write, but
    /// routed through the writer so the broadcast keeps commit order
    SetEstimate {
        item_id: Uuid,
        estimate: u32,
        reply: oneshot::Sender<Result<BoardItem>>,
    },
}

/// Per-board serialized mutation service
pub struct MutationCoordinator {
    pool: Pool<Sqlite>,
    hub: Arc<BroadcastHub>,
    writers: Mutex<HashMap<Uuid, mpsc::Sender<BoardCommand>>>,
    queue_depth: usize,
}

impl MutationCoordinator {
    pub fn new(pool: Pool<Sqlite>, hub: Arc<BroadcastHub>, queue_depth: usize) -> Self {
        Self {
            pool,
            hub,
            writers: Mutex::new(HashMap::new()),
            queue_depth,
        }
    }

    /// Decide a proposal on the owning board's writer
    pub async fn propose(
        &self,
        board_id: Uuid,
        proposal: MutationProposal,
    ) -> Result<MutationOutcome> {
        // Reject before touching the registry: a proposal against an
        // unknown item must not leave a writer task behind
        let current = db::items::get(&self.pool, proposal.item_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("board item {}", proposal.item_id)))?;
        if current.board_id != board_id {
            return Err(Error::NotFound(format!(
                "board item {} on board {board_id}",
                proposal.item_id
            )));
        }

        let (reply, rx) = oneshot::channel();
        self.dispatch(board_id, BoardCommand::Propose { proposal, reply })
            .await?;
        rx.await
            .map_err(|_| Error::Internal("board writer gone".into()))?
    }

    /// Write a session's finalized estimate through the board's writer
    ///
    /// The resulting `BoardItemMutated` is serialized with concurrent
    /// drags, so board-channel frames always match commit order.
    pub async fn apply_estimate(
        &self,
        board_id: Uuid,
        item_id: Uuid,
        estimate: u32,
    ) -> Result<BoardItem> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(
            board_id,
            BoardCommand::SetEstimate {
                item_id,
                estimate,
                reply,
            },
        )
        .await?;
        rx.await
            .map_err(|_| Error::Internal("board writer gone".into()))?
    }

    async fn dispatch(&self, board_id: Uuid, command: BoardCommand) -> Result<()> {
        // Clone the sender out of the registry before awaiting: a full
        // queue may park this caller, never dispatch to other boards
        let tx = {
            let mut writers = self.writers.lock().await;
            writers
                .entry(board_id)
                .or_insert_with(|| {
                    spawn_writer(
                        self.pool.clone(),
                        self.hub.clone(),
                        board_id,
                        self.queue_depth,
                    )
                })
                .clone()
        };

        if tx.send(command).await.is_err() {
            self.writers.lock().await.remove(&board_id);
            return Err(Error::Internal(format!(
                "board writer for {board_id} unavailable"
            )));
        }
        Ok(())
    }
}

fn spawn_writer(
    pool: Pool<Sqlite>,
    hub: Arc<BroadcastHub>,
    board_id: Uuid,
    queue_depth: usize,
) -> mpsc::Sender<BoardCommand> {
    let (tx, mut rx) = mpsc::channel::<BoardCommand>(queue_depth);

    tokio::spawn(async move {
        // Replay cache lives with the writer, bounded so a long-lived
        // board does not accumulate every request id it has ever seen
        let mut decided: HashMap<Uuid, MutationOutcome> = HashMap::new();
        let mut decided_order: VecDeque<Uuid> = VecDeque::new();

        while let Some(command) = rx.recv().await {
            match command {
                BoardCommand::Propose { proposal, reply } => {
                    if let Some(request_id) = proposal.request_id {
                        if let Some(outcome) = decided.get(&request_id) {
                            let _ = reply.send(Ok(outcome.clone()));
                            continue;
                        }
                    }

                    let result = decide(&pool, &hub, board_id, &proposal).await;
                    teardown_on_fatal(&hub, board_id, &result).await;
                    if let (Some(request_id), Ok(outcome)) = (proposal.request_id, &result) {
                        decided.insert(request_id, outcome.clone());
                        decided_order.push_back(request_id);
                        if decided_order.len() > REPLAY_CACHE_MAX {
                            if let Some(evicted) = decided_order.pop_front() {
                                decided.remove(&evicted);
                            }
                        }
                    }
                    let _ = reply.send(result);
                }
                BoardCommand::SetEstimate {
                    item_id,
                    estimate,
                    reply,
                } => {
                    let result = write_estimate(&pool, &hub, board_id, item_id, estimate).await;
                    teardown_on_fatal(&hub, board_id, &result).await;
                    let _ = reply.send(result);
                }
            }
        }
    });

    tx
}

async fn teardown_on_fatal<T>(hub: &BroadcastHub, board_id: Uuid, result: &Result<T>) {
    if let Err(e) = result {
        if e.class() == ErrorClass::Fatal {
            // Channel history is no longer trustworthy; subscribers
            // resync through fresh snapshots
            error!("Fatal error on board {board_id}: {e}");
            hub.teardown(ChannelId::Board(board_id)).await;
        }
    }
}

async fn write_estimate(
    pool: &Pool<Sqlite>,
    hub: &BroadcastHub,
    board_id: Uuid,
    item_id: Uuid,
    estimate: u32,
) -> Result<BoardItem> {
    let item = db::items::set_estimate(pool, item_id, estimate).await?;
    info!("Item {item_id} estimated at {estimate} on board {board_id}");
    hub.publish(
        ChannelId::Board(board_id),
        BoardEvent::BoardItemMutated {
            item: item.clone(),
            timestamp: Utc::now(),
        },
    )
    .await;
    Ok(item)
}

async fn decide(
    pool: &Pool<Sqlite>,
    hub: &BroadcastHub,
    board_id: Uuid,
    proposal: &MutationProposal,
) -> Result<MutationOutcome> {
    let current = db::items::get(pool, proposal.item_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("board item {}", proposal.item_id)))?;
    if current.board_id != board_id {
        return Err(Error::NotFound(format!(
            "board item {} on board {board_id}",
            proposal.item_id
        )));
    }

    // Structural check comes before any store write: a cross-parent
    // move is invalid at any version
    if let MutationChange::Move { lane_parent, .. } = &proposal.change {
        if current.parent_id.is_some() && *lane_parent != current.parent_id {
            return rollback(
                hub,
                board_id,
                current,
                RollbackReason::CrossParentMove,
                proposal.request_id,
            )
            .await;
        }
    }

    let patch = match &proposal.change {
        MutationChange::Move { status, .. } => ItemPatch {
            status: Some(*status),
            ..ItemPatch::default()
        },
        MutationChange::Assign { assignee } => ItemPatch {
            assignee: Some(*assignee),
            ..ItemPatch::default()
        },
    };

    match db::items::cas_update(pool, proposal.item_id, proposal.base_version, &patch).await? {
        Some(item) => {
            info!(
                "Item {} mutated to version {} on board {board_id}",
                item.id, item.version
            );
            hub.publish(
                ChannelId::Board(board_id),
                BoardEvent::BoardItemMutated {
                    item: item.clone(),
                    timestamp: Utc::now(),
                },
            )
            .await;
            Ok(MutationOutcome::Confirmed(item))
        }
        None => {
            // Version check lost; re-read the row the winner left behind
            let latest = db::items::get(pool, proposal.item_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("board item {}", proposal.item_id)))?;
            let reason = RollbackReason::StaleVersion {
                proposed: proposal.base_version,
                current: latest.version,
            };
            rollback(hub, board_id, latest, reason, proposal.request_id).await
        }
    }
}

async fn rollback(
    hub: &BroadcastHub,
    board_id: Uuid,
    item: BoardItem,
    reason: RollbackReason,
    request_id: Option<Uuid>,
) -> Result<MutationOutcome> {
    let error = reason.to_error(item.id);
    warn!("Mutation on item {} rejected: {error}", item.id);
    hub.publish(
        ChannelId::Board(board_id),
        BoardEvent::BoardItemRollback {
            item: item.clone(),
            reason: error.code().to_string(),
            request_id,
            timestamp: Utc::now(),
        },
    )
    .await;
    Ok(MutationOutcome::RolledBack { item, reason })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (MutationCoordinator, Pool<Sqlite>, Arc<BroadcastHub>, BoardItem) {
        let pool = db::connect_in_memory().await.unwrap();
        let hub = Arc::new(BroadcastHub::new(64));
        let item = BoardItem {
            id: Uuid::new_v4(),
            board_id: Uuid::new_v4(),
            title: "Wire up login".into(),
            status: BoardStatus::Backlog,
            estimate: None,
            parent_id: None,
            assignee: None,
            version: 1,
            updated_at: Utc::now(),
        };
        db::items::create(&pool, &item).await.unwrap();
        let coordinator = MutationCoordinator::new(pool.clone(), hub.clone(), 64);
        (coordinator, pool, hub, item)
    }

    fn move_to(item: &BoardItem, status: BoardStatus, base_version: i64) -> MutationProposal {
        MutationProposal {
            item_id: item.id,
            base_version,
            request_id: None,
            change: MutationChange::Move {
                status,
                lane_parent: item.parent_id,
            },
        }
    }

    #[tokio::test]
    async fn test_version_match_confirms() {
        let (coordinator, _pool, _hub, item) = setup().await;

        let outcome = coordinator
            .propose(item.board_id, move_to(&item, BoardStatus::InProgress, 1))
            .await
            .unwrap();

        match outcome {
            MutationOutcome::Confirmed(updated) => {
                assert_eq!(updated.status, BoardStatus::InProgress);
                assert_eq!(updated.version, 2);
            }
            other => panic!("expected confirmation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stale_version_rolls_back_to_last_confirmed() {
        let (coordinator, _pool, _hub, item) = setup().await;

        coordinator
            .propose(item.board_id, move_to(&item, BoardStatus::InProgress, 1))
            .await
            .unwrap();

        // Second client still acting on version 1
        let outcome = coordinator
            .propose(item.board_id, move_to(&item, BoardStatus::Done, 1))
            .await
            .unwrap();

        match outcome {
            MutationOutcome::RolledBack {
                item: confirmed,
                reason,
            } => {
                assert_eq!(confirmed.status, BoardStatus::InProgress);
                assert_eq!(confirmed.version, 2);
                assert!(matches!(
                    reason,
                    RollbackReason::StaleVersion {
                        proposed: 1,
                        current: 2,
                    }
                ));
            }
            other => panic!("expected rollback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cross_parent_move_rejected_before_store() {
        let (coordinator, pool, _hub, _) = setup().await;
        let parent_a = Uuid::new_v4();
        let child = BoardItem {
            id: Uuid::new_v4(),
            board_id: Uuid::new_v4(),
            title: "Child task".into(),
            status: BoardStatus::Backlog,
            estimate: None,
            parent_id: Some(parent_a),
            assignee: None,
            version: 1,
            updated_at: Utc::now(),
        };
        db::items::create(&pool, &child).await.unwrap();

        let outcome = coordinator
            .propose(
                child.board_id,
                MutationProposal {
                    item_id: child.id,
                    base_version: 1,
                    request_id: None,
                    change: MutationChange::Move {
                        status: BoardStatus::Done,
                        lane_parent: Some(Uuid::new_v4()),
                    },
                },
            )
            .await
            .unwrap();

        match outcome {
            MutationOutcome::RolledBack { item, reason } => {
                assert!(matches!(reason, RollbackReason::CrossParentMove));
                // Nothing written: same status, same version
                assert_eq!(item.status, BoardStatus::Backlog);
                assert_eq!(item.version, 1);
            }
            other => panic!("expected rollback, got {other:?}"),
        }

        let stored = db::items::get(&pool, child.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_retry_with_same_request_id_replays_outcome() {
        let (coordinator, pool, _hub, item) = setup().await;
        let request_id = Some(Uuid::new_v4());
        let proposal = MutationProposal {
            item_id: item.id,
            base_version: 1,
            request_id,
            change: MutationChange::Assign {
                assignee: Some(Uuid::new_v4()),
            },
        };

        let first = coordinator
            .propose(item.board_id, proposal.clone())
            .await
            .unwrap();
        let second = coordinator.propose(item.board_id, proposal).await.unwrap();

        let (MutationOutcome::Confirmed(a), MutationOutcome::Confirmed(b)) = (first, second)
        else {
            panic!("expected both confirmed");
        };
        assert_eq!(a.version, b.version);

        // Applied exactly once
        let stored = db::items::get(&pool, item.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_assign_and_clear() {
        let (coordinator, _pool, _hub, item) = setup().await;
        let dev = Uuid::new_v4();

        let outcome = coordinator
            .propose(
                item.board_id,
                MutationProposal {
                    item_id: item.id,
                    base_version: 1,
                    request_id: None,
                    change: MutationChange::Assign {
                        assignee: Some(dev),
                    },
                },
            )
            .await
            .unwrap();
        let MutationOutcome::Confirmed(assigned) = outcome else {
            panic!("expected confirmation");
        };
        assert_eq!(assigned.assignee, Some(dev));

        let outcome = coordinator
            .propose(
                item.board_id,
                MutationProposal {
                    item_id: item.id,
                    base_version: assigned.version,
                    request_id: None,
                    change: MutationChange::Assign { assignee: None },
                },
            )
            .await
            .unwrap();
        let MutationOutcome::Confirmed(cleared) = outcome else {
            panic!("expected confirmation");
        };
        assert_eq!(cleared.assignee, None);
        assert_eq!(cleared.version, 3);
    }

    #[tokio::test]
    async fn test_unknown_item_rejected_without_spawning_writer() {
        let (coordinator, _pool, _hub, item) = setup().await;

        let err = coordinator
            .propose(
                item.board_id,
                MutationProposal {
                    item_id: Uuid::new_v4(),
                    base_version: 1,
                    request_id: None,
                    change: MutationChange::Assign { assignee: None },
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        // A proposal naming the wrong board is rejected the same way
        let err = coordinator
            .propose(Uuid::new_v4(), move_to(&item, BoardStatus::Done, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        assert!(coordinator.writers.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_replay_cache_evicts_oldest_request_id() {
        let (coordinator, _pool, _hub, item) = setup().await;
        let first_request = Uuid::new_v4();

        coordinator
            .propose(
                item.board_id,
                MutationProposal {
                    item_id: item.id,
                    base_version: 1,
                    request_id: Some(first_request),
                    change: MutationChange::Assign {
                        assignee: Some(Uuid::new_v4()),
                    },
                },
            )
            .await
            .unwrap();

        // Enough newer decisions to push the first one out of the cache
        for i in 0..REPLAY_CACHE_MAX as i64 {
            coordinator
                .propose(
                    item.board_id,
                    MutationProposal {
                        item_id: item.id,
                        base_version: 2 + i,
                        request_id: Some(Uuid::new_v4()),
                        change: MutationChange::Assign {
                            assignee: Some(Uuid::new_v4()),
                        },
                    },
                )
                .await
                .unwrap();
        }

        // The evicted retry is decided afresh against the current row
        let outcome = coordinator
            .propose(
                item.board_id,
                MutationProposal {
                    item_id: item.id,
                    base_version: 1,
                    request_id: Some(first_request),
                    change: MutationChange::Assign {
                        assignee: Some(Uuid::new_v4()),
                    },
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            MutationOutcome::RolledBack {
                reason: RollbackReason::StaleVersion { proposed: 1, .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_full_queue_parks_only_its_caller() {
        let pool = db::connect_in_memory().await.unwrap();
        let hub = Arc::new(BroadcastHub::new(64));
        let item = BoardItem {
            id: Uuid::new_v4(),
            board_id: Uuid::new_v4(),
            title: "Wire up login".into(),
            status: BoardStatus::Backlog,
            estimate: None,
            parent_id: None,
            assignee: None,
            version: 1,
            updated_at: Utc::now(),
        };
        db::items::create(&pool, &item).await.unwrap();
        let coordinator = Arc::new(MutationCoordinator::new(pool.clone(), hub, 1));

        // Spawn the writer while the pool is still free
        coordinator
            .apply_estimate(item.board_id, item.id, 5)
            .await
            .unwrap();

        // Hold the pool's only connection so the writer wedges
        let conn = pool.acquire().await.unwrap();
        let mut pending = Vec::new();
        for _ in 0..3 {
            let coordinator = coordinator.clone();
            let (board_id, item_id) = (item.board_id, item.id);
            pending.push(tokio::spawn(async move {
                let _ = coordinator.apply_estimate(board_id, item_id, 8).await;
            }));
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        // One command in flight, one queued, one parked in dispatch;
        // the registry must stay lockable throughout
        let guard = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            coordinator.writers.lock(),
        )
        .await
        .expect("writer registry locked while a dispatch was parked");
        drop(guard);

        drop(conn);
        for task in pending {
            task.await.unwrap();
        }
    }
}
