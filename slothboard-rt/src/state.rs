//! Shared application state

use std::sync::Arc;

use sqlx::{Pool, Sqlite};

use crate::board::MutationCoordinator;
use crate::hub::BroadcastHub;
use crate::session::SessionService;
use slothboard_common::Config;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool<Sqlite>,
    pub hub: Arc<BroadcastHub>,
    pub sessions: Arc<SessionService>,
    pub boards: Arc<MutationCoordinator>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: Pool<Sqlite>, config: Config) -> Self {
        let hub = Arc::new(BroadcastHub::new(config.subscriber_queue));
        let boards = Arc::new(MutationCoordinator::new(
            pool.clone(),
            hub.clone(),
            config.channel_capacity,
        ));
        let sessions = Arc::new(SessionService::new(
            pool.clone(),
            hub.clone(),
            boards.clone(),
            config.channel_capacity,
        ));
        Self {
            pool,
            hub,
            sessions,
            boards,
            config: Arc::new(config),
        }
    }
}
