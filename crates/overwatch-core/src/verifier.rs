//! Delayed join verification.
//!
//! A flagged actor joining a scope fires an immediate alert, then a
//! second look two minutes later to catch the common case where admins
//! removed them right away. Presence is established through a tier of
//! lookups, cheapest first, and each outcome carries a breadcrumb string
//! describing which tier decided so the alert itself explains the call.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use overwatch_client::Gateway;
use overwatch_types::{
    internal_scope_id, ActorProfile, AlertKind, NotificationKey, ScopeId, ScopeInfo,
};

use crate::policy::AlertPolicy;
use crate::state::SharedState;

/// How long after a join the presence check runs.
pub const VERIFY_DELAY_SECS: u64 = 120;

/// Page size for the recent-participants fallback.
pub const VERIFY_RECENT_LIMIT: usize = 200;

/// Result of the stepped check: a verdict when some tier could decide,
/// plus the breadcrumb of how it got there.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub present: Option<bool>,
    pub why: String,
}

async fn resolve_actor_tiered(
    gateway: &dyn Gateway,
    actor_id: &str,
    handle: Option<&str>,
) -> (Option<ActorProfile>, String) {
    let by_id = match gateway.resolve_actor(actor_id).await {
        Ok(profile) => return (Some(profile), "id".to_string()),
        Err(e) => e,
    };
    if let Some(h) = handle {
        let h = h.trim();
        if !h.is_empty() {
            let h = if h.starts_with('@') {
                h.to_string()
            } else {
                format!("@{h}")
            };
            if let Ok(profile) = gateway.resolve_handle(&h).await {
                return (Some(profile), format!("username:{h}"));
            }
        }
    }
    (None, format!("fail:{by_id}"))
}

/// One page of recent participants, scanned for the actor. `None` means
/// the check could not run (flood wait, or the scope type does not
/// support it).
async fn recent_participants_contains(
    gateway: &dyn Gateway,
    scope_id: ScopeId,
    actor_id: &str,
    limit: usize,
) -> Option<bool> {
    match gateway.recent_participants(scope_id, limit).await {
        Ok(participants) => Some(participants.iter().any(|p| p.id == actor_id)),
        Err(e) => {
            if let Some(wait) = e.flood_wait() {
                warn!(
                    "flood wait in recent participants: sleeping {}s",
                    wait.as_secs()
                );
                tokio::time::sleep(wait).await;
            } else {
                info!("recent participants check unavailable: {e}");
            }
            None
        }
    }
}

fn rp_suffix(rp: Option<bool>) -> &'static str {
    match rp {
        Some(true) => "recent_participants:yes",
        Some(false) => "recent_participants:no",
        None => "recent_participants:unavailable",
    }
}

/// Stepped presence check.
///
/// 1. Resolve the actor by id, then by deny-list handle. Unresolvable
///    actors fall straight to the recent-participants page.
/// 2. An actor whose last-seen is hidden breaks shared-scope lookups, so
///    that case also goes straight to recent participants.
/// 3. Otherwise ask for shared scopes, which is the cheapest reliable
///    check, falling back to recent participants on errors. A flood wait
///    here leaves the verdict open rather than burning the page lookup.
pub async fn verify_presence_stepped(
    gateway: &dyn Gateway,
    scope_id: ScopeId,
    actor_id: &str,
    handle: Option<&str>,
    recent_limit: usize,
) -> VerifyOutcome {
    let (profile, how) = resolve_actor_tiered(gateway, actor_id, handle).await;

    let Some(profile) = profile else {
        let rp = recent_participants_contains(gateway, scope_id, actor_id, recent_limit).await;
        return VerifyOutcome {
            present: rp,
            why: format!("resolve_failed:{how} -> {}", rp_suffix(rp)),
        };
    };

    if profile.status.is_hidden() {
        let rp = recent_participants_contains(gateway, scope_id, actor_id, recent_limit).await;
        return VerifyOutcome {
            present: rp,
            why: format!("status:long_ago ({how}) -> {}", rp_suffix(rp)),
        };
    }

    match gateway.common_scopes(&profile.id).await {
        Ok(scopes) => {
            let internal = internal_scope_id(scope_id);
            let present = scopes
                .iter()
                .any(|cid| *cid == scope_id || internal_scope_id(*cid) == internal);
            let verdict = if present { "yes" } else { "no" };
            VerifyOutcome {
                present: Some(present),
                why: format!("common_chats:{verdict} ({how})"),
            }
        }
        Err(e) => {
            if let Some(wait) = e.flood_wait() {
                warn!("flood wait in common chats check: sleeping {}s", wait.as_secs());
                tokio::time::sleep(wait).await;
                return VerifyOutcome {
                    present: None,
                    why: format!("common_chats:floodwait ({how})"),
                };
            }
            let rp = recent_participants_contains(gateway, scope_id, actor_id, recent_limit).await;
            VerifyOutcome {
                present: rp,
                why: format!("common_chats:error ({how}) {e} -> {}", rp_suffix(rp)),
            }
        }
    }
}

pub struct JoinVerifier {
    gateway: Arc<dyn Gateway>,
    state: SharedState,
    policy: Arc<AlertPolicy>,
}

impl JoinVerifier {
    pub fn new(gateway: Arc<dyn Gateway>, state: SharedState, policy: Arc<AlertPolicy>) -> Self {
        Self {
            gateway,
            state,
            policy,
        }
    }

    /// Entry point for the spawned verification task.
    pub async fn verify_after_delay(
        self: Arc<Self>,
        scope: ScopeInfo,
        actor_id: String,
        display_name: String,
        topic: Option<String>,
    ) {
        tokio::time::sleep(Duration::from_secs(VERIFY_DELAY_SECS)).await;
        self.run_verification(&scope, &actor_id, &display_name, topic.as_deref())
            .await;
    }

    /// The actual check, split out so tests can skip the delay. The handle
    /// comes from the deny list as it stands now, not as it stood at join
    /// time, since the hourly refresh may have improved it.
    pub async fn run_verification(
        &self,
        scope: &ScopeInfo,
        actor_id: &str,
        display_name: &str,
        topic: Option<&str>,
    ) {
        let deny = self.state.deny_list();
        let handle = deny
            .get(actor_id)
            .and_then(|r| r.usable_handle())
            .map(|h| h.to_string());

        let outcome = verify_presence_stepped(
            self.gateway.as_ref(),
            scope.id,
            actor_id,
            handle.as_deref(),
            VERIFY_RECENT_LIMIT,
        )
        .await;
        info!("verify detail: {}", outcome.why);

        let topic_line = topic
            .map(|t| format!("• Scammer topic: {t}\n"))
            .unwrap_or_default();
        let title = scope.title_or_unknown();

        match outcome.present {
            Some(true) => {
                let text = format!(
                    "🚨 **Scammer joined chat**\n\
                     • Chat: **{title}**\n\
                     • Chat link: {}\n\
                     • Scammer: {display_name} (id `{actor_id}`)\n\
                     {topic_line}",
                    scope.link()
                );
                info!("verify: still in '{title}': {display_name} ({actor_id})");
                self.policy
                    .notify(
                        NotificationKey::new(AlertKind::Verify, scope.id, actor_id, "still"),
                        text.trim_end(),
                    )
                    .await;
            }
            Some(false) => {
                warn!("verify: gone from '{title}': {display_name} ({actor_id})");
            }
            None => {
                let text = format!(
                    "🚨 **Scammer joined chat (verify inconclusive)**\n\
                     • Chat: **{title}**\n\
                     • Chat link: {}\n\
                     • Scammer: {display_name} (id `{actor_id}`)\n\
                     {topic_line}\
                     • Verify: {}",
                    scope.link(),
                    outcome.why
                );
                info!(
                    "verify: inconclusive for '{title}': {display_name} ({actor_id}) ({})",
                    outcome.why
                );
                self.policy
                    .notify(
                        NotificationKey::new(AlertKind::Verify, scope.id, actor_id, "unknown"),
                        text.trim_end(),
                    )
                    .await;
            }
        }
    }
}
