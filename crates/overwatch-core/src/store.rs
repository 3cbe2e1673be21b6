//! Durable session state.
//!
//! A single JSON file holds the parts of the session worth keeping across
//! restarts: the last allowlist, the last observed event time, and the
//! dedup/delivery-cap ledgers with their composite keys flattened to
//! strings. Load problems never propagate; a missing, corrupt, or
//! version-mismatched file simply cold-starts the session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use overwatch_types::ScopeId;

use crate::state::SharedState;

pub const STATE_FILE_NAME: &str = "overwatch_state.json";
pub const STATE_VERSION: u32 = 1;
pub const STATE_SAVE_SECONDS: u64 = 60;

/// On-disk shape of the durable state. Timestamps are epoch seconds so the
/// file stays greppable; composite ledger keys are `|`-joined part lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    #[serde(default)]
    pub saved_at: i64,
    #[serde(default)]
    pub allowlist: Vec<ScopeId>,
    #[serde(default)]
    pub last_event_ts: Option<f64>,
    #[serde(default)]
    pub group_send: HashMap<String, f64>,
    #[serde(default)]
    pub notifications: HashMap<String, f64>,
}

pub fn epoch_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_nanos()) / 1e9
}

pub fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.trunc() as i64;
    let nanos = (secs.fract() * 1e9) as u32;
    DateTime::from_timestamp(whole, nanos)
}

/// Reads the state file, falling back to defaults when it is absent,
/// unreadable, or from another version.
pub async fn load_state(path: &Path) -> PersistedState {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no state file at {}; starting fresh", path.display());
            return PersistedState::default();
        }
        Err(e) => {
            warn!("failed to read state file {}: {e}; starting fresh", path.display());
            return PersistedState::default();
        }
    };

    let parsed: PersistedState = match serde_json::from_str(&raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("failed to parse state file {}: {e}; starting fresh", path.display());
            return PersistedState::default();
        }
    };

    if parsed.version != STATE_VERSION {
        warn!(
            "state file version mismatch (found {}, want {}); ignoring saved state",
            parsed.version, STATE_VERSION
        );
        return PersistedState::default();
    }

    parsed
}

/// Writes the state file in place. Failures are logged and swallowed; a
/// full disk must not take the session down.
pub async fn save_state(path: &Path, state: &PersistedState) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
    }
    let json = match serde_json::to_vec_pretty(state) {
        Ok(json) => json,
        Err(e) => {
            warn!("failed to serialize state: {e}");
            return;
        }
    };
    if let Err(e) = tokio::fs::write(path, json).await {
        warn!("failed to save state to {}: {e}", path.display());
    }
}

/// Snapshots and writes the durable state once a minute until cancelled.
pub async fn persist_periodically(state: SharedState, path: PathBuf, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(STATE_SAVE_SECONDS)) => {}
        }
        let snapshot = state.export(Utc::now());
        save_state(&path, &snapshot).await;
    }
}
