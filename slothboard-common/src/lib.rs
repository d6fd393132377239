//! # Slothboard Common Library
//!
//! Shared code for the Slothboard realtime services including:
//! - Data model (sessions, votes, voter identities, board items)
//! - Event types (BoardEvent enum) and wire envelope
//! - Error taxonomy
//! - Configuration loading

pub mod config;
pub mod error;
pub mod events;
pub mod model;

pub use config::Config;
pub use error::{Error, ErrorClass, Result};
pub use events::{BoardEvent, ChannelId, EventFrame};
pub use model::{BoardItem, BoardStatus, Vote, VoterIdentity, VotingSession};
