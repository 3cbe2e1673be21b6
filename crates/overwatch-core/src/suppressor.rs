//! Duplicate alert suppression.
//!
//! When several monitoring accounts sit in the same scope they tend to
//! report the same flagged actor within moments of each other. Every
//! incoming message that looks like one of our alert posts is checked
//! against the own-alert ledger; if someone else's copy is older than
//! ours, our newer posts are deleted so the scope keeps a single report.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use tracing::{info, warn};

use overwatch_client::Gateway;
use overwatch_types::{ContentEvent, ReportMode};

use crate::state::SharedState;

/// Marker every alert post carries; see the alert text builders.
pub const DUPLICATE_MARKER: &str = "🚨";

fn actor_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // platform actor ids are usually 7-12 digits; 6+ is a safe floor
    PATTERN.get_or_init(|| Regex::new(r"\b\d{6,}\b").expect("actor id pattern"))
}

/// A message counts as an alert post when it carries the marker emoji and
/// mentions "scam" in any casing.
pub fn looks_like_alert(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    text.contains(DUPLICATE_MARKER) && text.to_lowercase().contains("scam")
}

pub fn extract_actor_ids(text: &str) -> HashSet<String> {
    actor_id_pattern()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

pub struct DuplicateSuppressor {
    gateway: Arc<dyn Gateway>,
    state: SharedState,
    mode: ReportMode,
}

impl DuplicateSuppressor {
    pub fn new(gateway: Arc<dyn Gateway>, state: SharedState, mode: ReportMode) -> Self {
        Self {
            gateway,
            state,
            mode,
        }
    }

    /// Inspects one incoming message and deletes our own newer duplicates
    /// of it. Only active when in-scope delivery is enabled, since without
    /// it we never post anything worth deleting.
    pub async fn inspect(&self, event: &ContentEvent) {
        if !self.mode.group_delivery() {
            return;
        }
        let text = event.text.trim();
        if !looks_like_alert(text) {
            return;
        }
        if event.outgoing {
            return;
        }
        let candidate_actors = extract_actor_ids(text);
        if candidate_actors.is_empty() {
            return;
        }

        let Some((overlap, matching)) =
            self.state
                .duplicate_candidates(event.scope_id, &candidate_actors, Utc::now())
        else {
            return;
        };
        if matching.is_empty() {
            return;
        }

        // only our posts strictly newer than the incoming copy go
        let to_delete: Vec<i64> = matching
            .iter()
            .filter(|a| a.ts > event.sent_at)
            .map(|a| a.message_id)
            .collect();
        if to_delete.is_empty() {
            return;
        }

        match self
            .gateway
            .delete_messages(event.scope_id, &to_delete, true)
            .await
        {
            Ok(()) => {
                let mut shown: Vec<&str> = overlap.iter().map(|s| s.as_str()).collect();
                shown.sort_unstable();
                let more = if shown.len() > 5 { "..." } else { "" };
                shown.truncate(5);
                info!(
                    "duplicate detector: deleted {} newer duplicate alert(s) in scope {} (actors={:?}{more})",
                    to_delete.len(),
                    event.scope_id,
                    shown
                );
            }
            Err(e) => {
                if let Some(wait) = e.flood_wait() {
                    warn!(
                        "flood wait while deleting duplicates: sleeping {}s",
                        wait.as_secs()
                    );
                    tokio::time::sleep(wait).await;
                } else {
                    warn!(
                        "duplicate detector: failed to delete duplicates in scope {}: {e}",
                        event.scope_id
                    );
                }
            }
        }

        // forget them either way so a failed delete is not retried forever
        self.state.untrack_own_alerts(event.scope_id, &to_delete);
    }
}
