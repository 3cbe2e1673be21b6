//! Session liveness watchdog.
//!
//! A healthy session in a handful of busy scopes sees traffic constantly;
//! hours of total silence almost always mean the event feed died without
//! the connection noticing. The watchdog compares the last observed event
//! time against an idle ceiling and requests a full process restart when
//! it is exceeded.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::state::SharedState;

/// How often the idle check runs.
pub const LIFE_CHECK_SECONDS: u64 = 5 * 60;

/// Total event silence after which the session is restarted.
pub const IDLE_RESTART_SECONDS: u64 = 4 * 60 * 60;

/// Watches for event silence until cancelled. A session that has seen no
/// events at all yet is left alone; the clock only starts with the first
/// observed event.
pub async fn life_check_periodically(
    state: SharedState,
    session_cancel: CancellationToken,
    check_interval: Duration,
    idle_restart: Duration,
) {
    loop {
        tokio::select! {
            _ = session_cancel.cancelled() => return,
            _ = tokio::time::sleep(check_interval) => {}
        }

        if state.restart_requested() {
            return;
        }
        let Some(last) = state.last_event_at() else {
            continue;
        };

        let idle = Utc::now() - last;
        if idle.num_seconds() >= idle_restart.as_secs() as i64 {
            state.request_restart();
            warn!(
                "life check: no events seen for {:.2} hours, requesting restart",
                idle.num_seconds() as f64 / 3600.0
            );
            session_cancel.cancel();
            return;
        }
    }
}
