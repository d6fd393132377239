//! REST endpoint handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::ApiError;
use crate::board::{MutationOutcome, MutationProposal};
use crate::db;
use crate::identity::{self, JoinForm, MemberCredential, VoterRef};
use crate::session::VoteLedger;
use crate::state::AppState;
use slothboard_common::model::BoardStatus;
use slothboard_common::{BoardEvent, BoardItem, Error, Result};

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub board_item_id: Uuid,
    pub moderator: MemberCredential,
}

/// POST /sessions
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> std::result::Result<Response, ApiError> {
    let session = state
        .sessions
        .create_session(req.board_item_id, req.moderator.into())
        .await?;
    Ok((StatusCode::CREATED, Json(session)).into_response())
}

/// GET /sessions/:id
///
/// Same snapshot a late SSE subscriber receives, minus the frame.
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> std::result::Result<Response, ApiError> {
    let snapshot = session_snapshot(&state, id).await?;
    Ok(Json(snapshot).into_response())
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub member: Option<MemberCredential>,
    pub join: Option<JoinForm>,
}

/// POST /sessions/:id/join
///
/// Mints a session-scoped guest identity from the join form, or echoes
/// the member identity back. The returned identity is the caller's
/// voter token for the rest of the session.
pub async fn join_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<JoinRequest>,
) -> std::result::Result<Response, ApiError> {
    // Session must exist before a guest can be scoped to it
    db::sessions::get(&state.pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("session {id}")))?;

    let identity = identity::resolve_join(&state.pool, id, req.member, req.join).await?;
    Ok((StatusCode::CREATED, Json(identity)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CastVoteRequest {
    #[serde(flatten)]
    pub voter: VoterRef,
    pub value: u32,
    pub request_id: Option<Uuid>,
}

/// POST /sessions/:id/votes
pub async fn cast_vote(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CastVoteRequest>,
) -> std::result::Result<Response, ApiError> {
    let identity = identity::resolve_ref(&state.pool, id, req.voter).await?;
    state
        .sessions
        .cast_vote(id, identity, req.value, req.request_id)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
pub struct ModeratorRequest {
    #[serde(flatten)]
    pub voter: VoterRef,
}

/// POST /sessions/:id/reveal
pub async fn reveal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ModeratorRequest>,
) -> std::result::Result<Response, ApiError> {
    let identity = identity::resolve_ref(&state.pool, id, req.voter).await?;
    let votes = state.sessions.reveal(id, identity).await?;
    let tally = VoteLedger::new(votes.clone()).tally();
    Ok(Json(json!({ "votes": votes, "tally": tally })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct FinalizeRequest {
    #[serde(flatten)]
    pub voter: VoterRef,
    pub value: u32,
}

/// POST /sessions/:id/finalize
pub async fn finalize(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<FinalizeRequest>,
) -> std::result::Result<Response, ApiError> {
    let identity = identity::resolve_ref(&state.pool, id, req.voter).await?;
    let item = state.sessions.finalize(id, identity, req.value).await?;
    Ok(Json(item).into_response())
}

/// GET /boards/:id
pub async fn get_board(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> std::result::Result<Response, ApiError> {
    let snapshot = board_snapshot(&state, id).await?;
    Ok(Json(snapshot).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    pub title: String,
    #[serde(default)]
    pub status: Option<BoardStatus>,
    pub parent_id: Option<Uuid>,
    pub assignee: Option<Uuid>,
}

/// POST /boards/:id/items
pub async fn create_item(
    State(state): State<AppState>,
    Path(board_id): Path<Uuid>,
    Json(req): Json<CreateItemRequest>,
) -> std::result::Result<Response, ApiError> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err(Error::InvalidInput("item title must not be empty".into()).into());
    }

    let item = BoardItem {
        id: Uuid::new_v4(),
        board_id,
        title: title.to_string(),
        status: req.status.unwrap_or(BoardStatus::Backlog),
        estimate: None,
        parent_id: req.parent_id,
        assignee: req.assignee,
        version: 1,
        updated_at: Utc::now(),
    };
    db::items::create(&state.pool, &item).await?;

    Ok((StatusCode::CREATED, Json(item)).into_response())
}

/// POST /boards/:id/mutations
///
/// Confirmed proposals answer 200 with the new row; rejected proposals
/// answer 409 with the last-confirmed row the client must revert to.
/// Both outcomes are also broadcast on the board channel.
pub async fn propose_mutation(
    State(state): State<AppState>,
    Path(board_id): Path<Uuid>,
    Json(proposal): Json<MutationProposal>,
) -> std::result::Result<Response, ApiError> {
    let item_id = proposal.item_id;
    match state.boards.propose(board_id, proposal).await? {
        MutationOutcome::Confirmed(item) => {
            Ok(Json(json!({ "outcome": "confirmed", "item": item })).into_response())
        }
        MutationOutcome::RolledBack { item, reason } => {
            let error = reason.to_error(item_id);
            Ok((
                StatusCode::CONFLICT,
                Json(json!({
                    "outcome": "rolled_back",
                    "error": error.code(),
                    "message": error.to_string(),
                    "item": item,
                })),
            )
                .into_response())
        }
    }
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Assemble the session snapshot event from the store
///
/// Vote values and the tally stay hidden while the session is still
/// collecting; only voter identities are visible.
pub async fn session_snapshot(state: &AppState, session_id: Uuid) -> Result<BoardEvent> {
    let session = db::sessions::get(&state.pool, session_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;

    let ledger = VoteLedger::new(db::votes::for_session(&state.pool, session_id).await?);
    let voters = ledger.voters();
    let revealed = session.revealed_at.is_some();
    let (votes, tally) = if revealed {
        (Some(ledger.votes().to_vec()), Some(ledger.tally()))
    } else {
        (None, None)
    };

    Ok(BoardEvent::SessionSnapshot {
        session,
        voters,
        votes,
        tally,
        timestamp: Utc::now(),
    })
}

/// Assemble the board snapshot event from the store
pub async fn board_snapshot(state: &AppState, board_id: Uuid) -> Result<BoardEvent> {
    let items = db::items::for_board(&state.pool, board_id).await?;
    Ok(BoardEvent::BoardSnapshot {
        board_id,
        items,
        timestamp: Utc::now(),
    })
}
