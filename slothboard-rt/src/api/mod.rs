//! HTTP API
//!
//! REST endpoints for the estimation and board operations, plus one SSE
//! endpoint per channel kind. Rejections surface with the status their
//! error class prescribes and a stable machine-readable code.

pub mod handlers;
pub mod sse;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use slothboard_common::{Error, ErrorClass};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/:id", get(handlers::get_session))
        .route("/sessions/:id/join", post(handlers::join_session))
        .route("/sessions/:id/votes", post(handlers::cast_vote))
        .route("/sessions/:id/reveal", post(handlers::reveal))
        .route("/sessions/:id/finalize", post(handlers::finalize))
        .route("/sessions/:id/events", get(sse::session_events))
        .route("/boards/:id", get(handlers::get_board))
        .route("/boards/:id/items", post(handlers::create_item))
        .route("/boards/:id/mutations", post(handlers::propose_mutation))
        .route("/boards/:id/events", get(sse::board_events))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error wrapper giving every [`Error`] an HTTP rendering
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match (&self.0, self.0.class()) {
            (Error::NotFound(_), _) => StatusCode::NOT_FOUND,
            (_, ErrorClass::Validation) => StatusCode::BAD_REQUEST,
            (_, ErrorClass::Conflict) => StatusCode::CONFLICT,
            (_, ErrorClass::Transient) => StatusCode::SERVICE_UNAVAILABLE,
            (_, ErrorClass::Fatal) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        }));

        (status, body).into_response()
    }
}
