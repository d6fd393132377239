//! Idle session reaper
//!
//! Periodically closes collecting sessions whose last activity is older
//! than the configured age, so abandoned estimation rounds do not hold
//! the one-active-session-per-item slot forever. Expired sessions close
//! through the session writer with no estimate; moderators see the same
//! `SessionClosed` event an explicit finalize would have produced.

use chrono::{Duration, Utc};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::db;
use crate::session::SessionService;

/// Sweep once: expire every collecting session idle past the cutoff
pub async fn sweep(
    pool: &Pool<Sqlite>,
    sessions: &SessionService,
    max_age_hours: u64,
) -> usize {
    let cutoff = Utc::now() - Duration::hours(max_age_hours as i64);
    let stale = match db::sessions::stale_collecting(pool, cutoff).await {
        Ok(stale) => stale,
        Err(e) => {
            warn!("Reaper sweep failed to query stale sessions: {e}");
            return 0;
        }
    };

    let mut reaped = 0;
    for session in stale {
        match sessions.expire(session.id).await {
            Ok(true) => reaped += 1,
            Ok(false) => {}
            Err(e) => warn!("Failed to expire session {}: {e}", session.id),
        }
    }

    if reaped > 0 {
        info!("Reaped {reaped} idle session(s)");
    }
    reaped
}

/// Spawn the background sweep loop; `max_age_hours == 0` disables it
pub fn spawn(pool: Pool<Sqlite>, sessions: Arc<SessionService>, max_age_hours: u64) {
    if max_age_hours == 0 {
        info!("Idle session reaper disabled");
        return;
    }

    tokio::spawn(async move {
        // Sweep at a fraction of the age so sessions expire within
        // roughly 10% of their deadline
        let period = std::time::Duration::from_secs((max_age_hours * 360).max(60));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            sweep(&pool, &sessions, max_age_hours).await;
        }
    });
}
