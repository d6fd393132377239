//! Broadcast hub
//!
//! Fan-out of committed events to every subscriber of a channel (one
//! channel per session, one per board). Each channel carries a monotonic
//! commit sequence; delivery order within a channel matches commit order.
//! Delivery never blocks a committing writer: each subscriber owns a
//! bounded outbound queue and is disconnected when it falls behind, at
//! which point it must resubscribe and receive a fresh snapshot.

use slothboard_common::{BoardEvent, ChannelId, EventFrame, Result};
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

struct Subscriber {
    tx: mpsc::Sender<EventFrame>,
}

#[derive(Default)]
struct ChannelState {
    /// Sequence of the most recently committed event (0 = none yet)
    last_seq: u64,
    subscribers: Vec<Subscriber>,
}

/// Per-channel pub/sub registry
pub struct BroadcastHub {
    channels: Mutex<HashMap<ChannelId, ChannelState>>,
    subscriber_queue: usize,
}

impl BroadcastHub {
    /// `subscriber_queue` is the outbound depth per subscriber before a
    /// lagging subscriber is disconnected
    pub fn new(subscriber_queue: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            subscriber_queue,
        }
    }

    /// Publish one committed event on a channel
    ///
    /// Assigns the next commit sequence, frames the event, and hands it
    /// to every live subscriber without awaiting any of them. Returns
    /// the frame so callers can echo it to the requester.
    pub async fn publish(&self, channel: ChannelId, event: BoardEvent) -> EventFrame {
        let mut channels = self.channels.lock().await;
        let state = channels.entry(channel).or_default();
        state.last_seq += 1;
        let frame = EventFrame::new(channel, state.last_seq, event);

        state.subscribers.retain(|sub| {
            match sub.tx.try_send(frame.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Fell behind its bounded queue: disconnect, it will
                    // resubscribe and get a snapshot
                    warn!("Dropping lagging subscriber on {channel}");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        debug!(
            "Committed seq {} on {channel} ({} subscribers)",
            frame.server_seq,
            state.subscribers.len()
        );
        frame
    }

    /// Subscribe to a channel, receiving a snapshot first
    ///
    /// The snapshot future is resolved while the channel registry is
    /// locked, so no event can be committed between reading the snapshot
    /// and registering the subscriber: a commit is either covered by the
    /// snapshot's sequence or delivered as an incremental frame (a
    /// commit that lands just before the lock can appear in both, which
    /// clients dedupe by sequence). The snapshot is framed with the
    /// channel's current commit sequence.
    pub async fn subscribe<Fut>(
        &self,
        channel: ChannelId,
        snapshot: Fut,
    ) -> Result<mpsc::Receiver<EventFrame>>
    where
        Fut: Future<Output = Result<BoardEvent>>,
    {
        let (tx, rx) = mpsc::channel(self.subscriber_queue);

        let mut channels = self.channels.lock().await;
        let snapshot = snapshot.await?;
        let state = channels.entry(channel).or_default();

        let frame = EventFrame::new(channel, state.last_seq, snapshot);
        // Queue is empty at this point, send cannot fail
        let _ = tx.try_send(frame);

        state.subscribers.push(Subscriber { tx });
        debug!(
            "New subscriber on {channel} ({} total)",
            state.subscribers.len()
        );
        Ok(rx)
    }

    /// Current subscriber count for a channel
    pub async fn subscriber_count(&self, channel: ChannelId) -> usize {
        let channels = self.channels.lock().await;
        channels
            .get(&channel)
            .map(|state| state.subscribers.len())
            .unwrap_or(0)
    }

    /// Tear a channel down, disconnecting all its subscribers
    ///
    /// Used when an invariant violation makes the channel's history
    /// untrustworthy; subscribers resync through fresh snapshots.
    pub async fn teardown(&self, channel: ChannelId) {
        let mut channels = self.channels.lock().await;
        if let Some(state) = channels.get_mut(&channel) {
            state.subscribers.clear();
            warn!("Channel {channel} torn down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::future::ready;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use uuid::Uuid;

    fn closed_event(session_id: Uuid) -> BoardEvent {
        BoardEvent::SessionClosed {
            session_id,
            board_item_id: Uuid::new_v4(),
            estimate: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_per_channel_ordering() {
        let hub = BroadcastHub::new(16);
        let sid = Uuid::new_v4();
        let channel = ChannelId::Session(sid);

        let mut rx = hub.subscribe(channel, ready(Ok(closed_event(sid)))).await.unwrap();
        // Snapshot first, at seq 0 (nothing committed yet)
        assert_eq!(rx.recv().await.unwrap().server_seq, 0);

        for _ in 0..3 {
            hub.publish(channel, closed_event(sid)).await;
        }

        assert_eq!(rx.recv().await.unwrap().server_seq, 1);
        assert_eq!(rx.recv().await.unwrap().server_seq, 2);
        assert_eq!(rx.recv().await.unwrap().server_seq, 3);
    }

    #[tokio::test]
    async fn test_channels_are_independent() {
        let hub = BroadcastHub::new(16);
        let a = ChannelId::Session(Uuid::new_v4());
        let b = ChannelId::Board(Uuid::new_v4());

        let fa = hub.publish(a, closed_event(Uuid::new_v4())).await;
        let fb = hub.publish(b, closed_event(Uuid::new_v4())).await;

        // Each channel counts from 1 on its own
        assert_eq!(fa.server_seq, 1);
        assert_eq!(fb.server_seq, 1);
    }

    #[tokio::test]
    async fn test_late_subscriber_snapshot_carries_current_seq() {
        let hub = BroadcastHub::new(16);
        let sid = Uuid::new_v4();
        let channel = ChannelId::Session(sid);

        hub.publish(channel, closed_event(sid)).await;
        hub.publish(channel, closed_event(sid)).await;

        let mut rx = hub.subscribe(channel, ready(Ok(closed_event(sid)))).await.unwrap();
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.server_seq, 2);

        let frame = hub.publish(channel, closed_event(sid)).await;
        assert_eq!(frame.server_seq, 3);
        assert_eq!(rx.recv().await.unwrap().server_seq, 3);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_disconnected_writer_unblocked() {
        let hub = BroadcastHub::new(2);
        let sid = Uuid::new_v4();
        let channel = ChannelId::Session(sid);

        // Subscribe but never drain
        let _rx = hub.subscribe(channel, ready(Ok(closed_event(sid)))).await.unwrap();
        assert_eq!(hub.subscriber_count(channel).await, 1);

        // Snapshot occupies one slot; two more publishes overflow the queue
        hub.publish(channel, closed_event(sid)).await;
        hub.publish(channel, closed_event(sid)).await;

        assert_eq!(hub.subscriber_count(channel).await, 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_pruned() {
        let hub = BroadcastHub::new(16);
        let sid = Uuid::new_v4();
        let channel = ChannelId::Session(sid);

        let rx = hub.subscribe(channel, ready(Ok(closed_event(sid)))).await.unwrap();
        drop(rx);

        hub.publish(channel, closed_event(sid)).await;
        assert_eq!(hub.subscriber_count(channel).await, 0);
    }

    #[tokio::test]
    async fn test_commit_during_snapshot_read_is_not_lost() {
        let hub = Arc::new(BroadcastHub::new(16));
        let sid = Uuid::new_v4();
        let channel = ChannelId::Session(sid);

        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();

        // Subscriber whose snapshot read stalls until we let it finish
        let sub_hub = hub.clone();
        let subscriber = tokio::spawn(async move {
            sub_hub
                .subscribe(channel, async move {
                    let _ = entered_tx.send(());
                    let _ = release_rx.await;
                    Ok(closed_event(sid))
                })
                .await
                .unwrap()
        });
        entered_rx.await.unwrap();

        // A writer committing mid-snapshot must wait for the registration
        let pub_hub = hub.clone();
        let publisher = tokio::spawn(async move { pub_hub.publish(channel, closed_event(sid)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!publisher.is_finished());

        release_tx.send(()).unwrap();
        let frame = publisher.await.unwrap();
        assert_eq!(frame.server_seq, 1);

        // The subscriber sees the snapshot at the pre-commit sequence and
        // then the commit itself as a delta; nothing falls in a gap
        let mut rx = subscriber.await.unwrap();
        assert_eq!(rx.recv().await.unwrap().server_seq, 0);
        assert_eq!(rx.recv().await.unwrap().server_seq, 1);
    }
}
