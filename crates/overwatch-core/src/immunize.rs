//! Pre-emptive blocking of flagged actors by handle.
//!
//! Walks the deny list, extracts every usable handle, and blocks them
//! one at a time with a long pause between blocks so the platform's
//! rate limiter is never tripped.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{error, info, warn};

use overwatch_client::{Gateway, GatewayError};
use overwatch_denylist::DenyListSnapshot;

pub const BLOCK_DELAY_SECONDS: u64 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImmunizeOutcome {
    pub blocked: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Deduped `@handle` list from the deny-list records, sorted
/// case-insensitively. Placeholder usernames ("None", "DELETED",
/// blanks) never qualify.
pub fn usable_handles(deny: &DenyListSnapshot) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for record in deny.records().values() {
        let Some(h) = record.usable_handle() else {
            continue;
        };
        let handle = if h.starts_with('@') {
            h.to_string()
        } else {
            format!("@{h}")
        };
        if seen.insert(handle.to_lowercase()) {
            out.push(handle);
        }
    }
    out.sort_by_key(|h| h.to_lowercase());
    out
}

/// Blocks each qualifying handle, one every `delay`. Unresolvable
/// handles are skipped; a flood wait is slept off before moving on.
pub async fn immunize(
    gateway: &dyn Gateway,
    deny: &DenyListSnapshot,
    delay: Duration,
) -> ImmunizeOutcome {
    let handles = usable_handles(deny);
    if handles.is_empty() {
        info!("no handles qualified for blocking");
        return ImmunizeOutcome::default();
    }

    info!("immunize mode: {} handle(s) to block", handles.len());
    info!("blocking cadence: 1 every {}s", delay.as_secs());

    let mut outcome = ImmunizeOutcome::default();
    let total = handles.len();
    for (idx, handle) in handles.iter().enumerate() {
        info!("[{}/{total}] blocking {handle}", idx + 1);
        match gateway.block_actor(handle).await {
            Ok(()) => {
                info!("blocked {handle}");
                outcome.blocked += 1;
            }
            Err(GatewayError::FloodWait(wait)) => {
                warn!("flood wait: sleeping {}s then continuing", wait.as_secs());
                tokio::time::sleep(wait).await;
                outcome.failed += 1;
            }
            Err(e @ (GatewayError::NotFound(_) | GatewayError::Unsupported(_))) => {
                warn!("handle not resolvable: {handle} ({e}), skipping");
                outcome.skipped += 1;
            }
            Err(e) => {
                error!("failed to block {handle}: {e}");
                outcome.failed += 1;
            }
        }
        if idx + 1 < total {
            tokio::time::sleep(delay).await;
        }
    }
    info!(
        "immunize finished: {} blocked, {} skipped, {} failed",
        outcome.blocked, outcome.skipped, outcome.failed
    );
    outcome
}
