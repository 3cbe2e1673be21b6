//! One-shot sweep of scope rosters against the deny list.
//!
//! Unlike the live monitor, the scan walks every titled group and
//! broadcast feed (optionally filtered by title substring), pulls the
//! full participant roster, and reports any flagged members it finds.

use std::time::Duration;

use tracing::{error, info, warn};

use overwatch_client::Gateway;
use overwatch_denylist::DenyListSnapshot;
use overwatch_types::{ScopeId, ScopeInfo, ScopeKind, SendTarget};

pub const SCAN_SCOPE_PAUSE_MILLIS: u64 = 200;
pub const SCAN_REPORT_PAUSE_SECONDS: u64 = 2;

/// Where scan reports go, next to the console log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanReportMode {
    ConsoleOnly,
    SavedMessages,
    InScope,
}

impl ScanReportMode {
    pub fn from_number(n: u8) -> Option<ScanReportMode> {
        match n {
            1 => Some(ScanReportMode::ConsoleOnly),
            2 => Some(ScanReportMode::SavedMessages),
            3 => Some(ScanReportMode::InScope),
            _ => None,
        }
    }

    pub fn as_number(&self) -> u8 {
        match self {
            ScanReportMode::ConsoleOnly => 1,
            ScanReportMode::SavedMessages => 2,
            ScanReportMode::InScope => 3,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ScanReportMode::ConsoleOnly => "Console only",
            ScanReportMode::SavedMessages => "Console + Saved Messages",
            ScanReportMode::InScope => "Console + Chat message",
        }
    }
}

/// Rest periods between platform calls during a sweep.
#[derive(Debug, Clone, Copy)]
pub struct ScanPacing {
    pub between_scopes: Duration,
    pub after_report: Duration,
}

impl Default for ScanPacing {
    fn default() -> Self {
        Self {
            between_scopes: Duration::from_millis(SCAN_SCOPE_PAUSE_MILLIS),
            after_report: Duration::from_secs(SCAN_REPORT_PAUSE_SECONDS),
        }
    }
}

/// One flagged participant found during a sweep.
#[derive(Debug, Clone)]
pub struct FoundActor {
    pub actor_id: String,
    pub display: String,
    pub topic_link: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub scopes_scanned: usize,
    pub scopes_skipped: usize,
    pub flagged_found: usize,
}

/// Titled groups and broadcast feeds, optionally narrowed by a
/// case-insensitive title substring.
pub fn filter_scan_targets(scopes: Vec<ScopeInfo>, filter: &str) -> Vec<ScopeInfo> {
    let needle = filter.trim().to_lowercase();
    scopes
        .into_iter()
        .filter(|s| matches!(s.kind, ScopeKind::Group | ScopeKind::Broadcast))
        .filter(|s| s.title.as_deref().is_some_and(|t| !t.is_empty()))
        .filter(|s| {
            needle.is_empty()
                || s.title
                    .as_deref()
                    .unwrap_or("")
                    .to_lowercase()
                    .contains(&needle)
        })
        .collect()
}

pub fn format_flagged_report(title: &str, found: &[FoundActor]) -> String {
    let mut out = format!("🚨 Scammer(s) found in **{title}** by Overwatch:");
    for actor in found {
        out.push('\n');
        match &actor.topic_link {
            Some(t) => out.push_str(&format!(
                "• {} (id `{}`) — topic: {t}",
                actor.display, actor.actor_id
            )),
            None => out.push_str(&format!("• {} (id `{}`)", actor.display, actor.actor_id)),
        }
    }
    out
}

/// Sweeps matching scopes. Scopes whose rosters cannot be read are
/// skipped, not fatal; only listing the scopes at all can fail.
pub async fn scan_scopes(
    gateway: &dyn Gateway,
    deny: &DenyListSnapshot,
    filter: &str,
    mode: ScanReportMode,
    pacing: ScanPacing,
) -> overwatch_client::Result<ScanOutcome> {
    let scopes = gateway.list_scopes().await?;
    info!("found {} total scopes", scopes.len());

    let targets = filter_scan_targets(scopes, filter);
    let filter = filter.trim();
    if targets.is_empty() {
        if filter.is_empty() {
            info!("no scannable scopes found");
        } else {
            warn!("no scopes found matching '{filter}'");
        }
        return Ok(ScanOutcome::default());
    }
    if filter.is_empty() {
        info!("no filter given, scanning all {} scopes", targets.len());
    } else {
        info!("found {} scope(s) matching '{filter}'", targets.len());
    }

    let mut outcome = ScanOutcome::default();
    let total = targets.len();
    for (idx, scope) in targets.iter().enumerate() {
        let title = scope.title_or_unknown();
        info!("[{}/{total}] checking '{title}' (id {})", idx + 1, scope.id);

        let participants = match gateway.participants(scope.id).await {
            Ok(participants) => participants,
            Err(e) => {
                warn!("could not retrieve participants for '{title}': {e}");
                outcome.scopes_skipped += 1;
                continue;
            }
        };

        let mut found = Vec::new();
        for participant in &participants {
            let Some(record) = deny.get(&participant.id) else {
                continue;
            };
            found.push(FoundActor {
                actor_id: participant.id.clone(),
                display: record.display_name(),
                topic_link: record.topic_link(),
            });
        }

        outcome.scopes_scanned += 1;
        if found.is_empty() {
            info!("no flagged actors in '{title}'");
        } else {
            for actor in &found {
                match &actor.topic_link {
                    Some(t) => info!(
                        "flagged in '{title}': {} (id {}) topic: {t}",
                        actor.display, actor.actor_id
                    ),
                    None => info!(
                        "flagged in '{title}': {} (id {})",
                        actor.display, actor.actor_id
                    ),
                }
            }
            outcome.flagged_found += found.len();
            let report = format_flagged_report(title, &found);
            deliver_report(gateway, mode, scope.id, &report, pacing.after_report).await;
        }

        if idx + 1 < total {
            tokio::time::sleep(pacing.between_scopes).await;
        }
    }
    Ok(outcome)
}

async fn deliver_report(
    gateway: &dyn Gateway,
    mode: ScanReportMode,
    scope_id: ScopeId,
    report: &str,
    pause: Duration,
) {
    let target = match mode {
        ScanReportMode::ConsoleOnly => return,
        ScanReportMode::SavedMessages => SendTarget::Operator,
        ScanReportMode::InScope => SendTarget::Scope(scope_id),
    };
    if let Err(e) = gateway.send_message(target, report, None).await {
        error!("failed to deliver scan report: {e}");
    } else {
        tokio::time::sleep(pause).await;
    }
}
