//! Server-Sent Events endpoints
//!
//! Each connection subscribes to exactly one channel. The first event is
//! always a snapshot framed at the channel's current commit sequence;
//! deltas follow in commit order, so a client is consistent from its
//! very first frame regardless of when it connects.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use futures::StreamExt;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};
use uuid::Uuid;

use crate::api::{handlers, ApiError};
use crate::state::AppState;
use slothboard_common::{ChannelId, EventFrame};

/// GET /sessions/:id/events
pub async fn session_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // The hub resolves the snapshot while holding the channel lock, so a
    // concurrent commit is never lost between snapshot and registration
    let rx = state
        .hub
        .subscribe(ChannelId::Session(id), handlers::session_snapshot(&state, id))
        .await?;
    debug!("SSE subscriber attached to session {id}");
    Ok(sse_stream(rx))
}

/// GET /boards/:id/events
pub async fn board_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let rx = state
        .hub
        .subscribe(ChannelId::Board(id), handlers::board_snapshot(&state, id))
        .await?;
    debug!("SSE subscriber attached to board {id}");
    Ok(sse_stream(rx))
}

fn sse_stream(
    rx: tokio::sync::mpsc::Receiver<EventFrame>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(rx).filter_map(|frame| async move {
        let event = Event::default()
            .event(frame.payload.event_type())
            .id(frame.server_seq.to_string());
        match event.json_data(&frame) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                error!("Failed to serialize SSE event: {e}");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
