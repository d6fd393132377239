//! Slothboard realtime daemon
//!
//! Realtime core for collaborative estimation and board work: scoped
//! estimation sessions with hidden-until-reveal voting, optimistic board
//! mutations with server-side conflict resolution, and per-channel SSE
//! fan-out with snapshot-first late join.

pub mod api;
pub mod board;
pub mod db;
pub mod hub;
pub mod identity;
pub mod reaper;
pub mod session;
pub mod state;

pub use api::build_router;
pub use state::AppState;
