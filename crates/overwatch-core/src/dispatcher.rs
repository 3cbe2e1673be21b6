//! Live event dispatch.
//!
//! One dispatcher owns the alert policy, the duplicate suppressor and the
//! join verifier, and routes everything the gateway feed produces. Content
//! events touch the liveness clock before any filtering, so the watchdog
//! sees traffic even when it all comes from unmonitored scopes. Membership
//! events do not count as liveness; platforms replay them in bursts during
//! catch-up and they would mask a dead message feed.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, Level};

use overwatch_client::Gateway;
use overwatch_observability::{emit_event, redact_text, ObservabilityEvent, ProcessKind};
use overwatch_types::{
    AlertKind, ContentEvent, GatewayEvent, MembershipChange, MembershipEvent, NotificationKey,
    ScopeId, ScopeInfo, ScopeKind,
};

use crate::policy::AlertPolicy;
use crate::state::SharedState;
use crate::suppressor::DuplicateSuppressor;
use crate::verifier::JoinVerifier;

pub struct EventDispatcher {
    gateway: Arc<dyn Gateway>,
    state: SharedState,
    policy: Arc<AlertPolicy>,
    suppressor: DuplicateSuppressor,
    verifier: Arc<JoinVerifier>,
}

impl EventDispatcher {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        state: SharedState,
        policy: Arc<AlertPolicy>,
        verifier: Arc<JoinVerifier>,
    ) -> Self {
        let suppressor =
            DuplicateSuppressor::new(gateway.clone(), state.clone(), policy.mode());
        Self {
            gateway,
            state,
            policy,
            suppressor,
            verifier,
        }
    }

    pub async fn handle(&self, event: GatewayEvent) {
        match event {
            GatewayEvent::Content(ev) => self.on_content(ev).await,
            GatewayEvent::Membership(ev) => self.on_membership(ev).await,
        }
    }

    async fn on_content(&self, event: ContentEvent) {
        // any message is proof of life, monitored scope or not
        self.state.note_event(Utc::now());

        if !self.state.allows(event.scope_id) {
            return;
        }
        let deny = self.state.deny_list();

        self.suppressor.inspect(&event).await;

        // service messages announcing added members are handled here and
        // never fall through to authored-content handling
        if !event.added_actor_ids.is_empty() {
            let scope = self.describe_scope(event.scope_id).await;
            for added in &event.added_actor_ids {
                let Some(record) = deny.get(added) else {
                    continue;
                };
                let display_name = record.display_name();
                let text = join_message_alert(
                    &scope,
                    &display_name,
                    added,
                    record.topic_link().as_deref(),
                );
                info!(
                    "scammer added/invited in '{}': {display_name} ({added})",
                    scope.title_or_unknown()
                );
                self.emit_alert(
                    AlertKind::JoinMessage,
                    event.scope_id,
                    added,
                    Some(event.message_id),
                    &event.message_id.to_string(),
                    None,
                );
                self.policy
                    .notify(
                        NotificationKey::new(
                            AlertKind::JoinMessage,
                            event.scope_id,
                            added.as_str(),
                            event.message_id.to_string(),
                        ),
                        &text,
                    )
                    .await;
            }
            return;
        }

        let Some(actor_id) = event.actor_id.as_deref() else {
            return;
        };
        let Some(record) = deny.get(actor_id) else {
            return;
        };

        let display_name = record.display_name();
        let scope = self.describe_scope(event.scope_id).await;
        let link = scope.message_link(event.message_id);
        let text = content_alert(
            &scope,
            &display_name,
            actor_id,
            event.message_id,
            record.topic_link().as_deref(),
        );
        info!(
            "scammer message in '{}' by {display_name} ({actor_id}) -> {link}",
            scope.title_or_unknown()
        );
        let redacted = redact_text(&event.text);
        self.emit_alert(
            AlertKind::Content,
            event.scope_id,
            actor_id,
            Some(event.message_id),
            &event.message_id.to_string(),
            Some(&redacted),
        );
        self.policy
            .notify(
                NotificationKey::new(
                    AlertKind::Content,
                    event.scope_id,
                    actor_id,
                    event.message_id.to_string(),
                ),
                &text,
            )
            .await;
    }

    async fn on_membership(&self, event: MembershipEvent) {
        if !self.state.allows(event.scope_id) {
            return;
        }
        let deny = self.state.deny_list();
        let Some(record) = deny.get(&event.actor_id) else {
            return;
        };

        let display_name = record.display_name();
        let topic = record.topic_link();
        let scope = self.describe_scope(event.scope_id).await;
        let text = membership_alert(
            &scope,
            event.change,
            &display_name,
            &event.actor_id,
            topic.as_deref(),
        );
        info!(
            "scammer {} in '{}': {display_name} ({})",
            event.change.as_str(),
            scope.title_or_unknown(),
            event.actor_id
        );
        self.emit_alert(
            AlertKind::Membership,
            event.scope_id,
            &event.actor_id,
            None,
            event.change.as_str(),
            None,
        );
        self.policy
            .notify(
                NotificationKey::new(
                    AlertKind::Membership,
                    event.scope_id,
                    event.actor_id.as_str(),
                    event.change.as_str(),
                ),
                &text,
            )
            .await;

        if event.change == MembershipChange::Joined {
            let verifier = self.verifier.clone();
            tokio::spawn(verifier.verify_after_delay(
                scope,
                event.actor_id.clone(),
                display_name,
                topic,
            ));
        }
    }

    /// Best-effort scope lookup. Events from scopes the directory cannot
    /// describe still produce alerts, just with unknown titles.
    async fn describe_scope(&self, scope_id: ScopeId) -> ScopeInfo {
        match self.gateway.scope_info(scope_id).await {
            Ok(info) => info,
            Err(e) => {
                debug!("scope {scope_id} could not be described: {e}");
                ScopeInfo {
                    id: scope_id,
                    title: None,
                    handle: None,
                    kind: ScopeKind::Unknown,
                    participant_count: None,
                }
            }
        }
    }

    fn emit_alert(
        &self,
        kind: AlertKind,
        scope_id: ScopeId,
        actor_id: &str,
        message_id: Option<i64>,
        correlation: &str,
        detail: Option<&str>,
    ) {
        let scope = scope_id.to_string();
        let message_id = message_id.map(|id| id.to_string());
        emit_event(
            Level::INFO,
            ProcessKind::Engine,
            ObservabilityEvent {
                event: "alert",
                component: "dispatcher",
                scope_id: Some(&scope),
                actor_id: Some(actor_id),
                message_id: message_id.as_deref(),
                alert_kind: Some(kind.as_str()),
                correlation: Some(correlation),
                status: None,
                error_code: None,
                detail,
            },
        );
    }
}

// ── alert text builders ──

pub fn content_alert(
    scope: &ScopeInfo,
    display: &str,
    actor_id: &str,
    message_id: i64,
    topic: Option<&str>,
) -> String {
    let topic_line = topic
        .map(|t| format!("• Scammer topic: {t}\n"))
        .unwrap_or_default();
    format!(
        "🚨 **Scammer message detected**\n\
         • Chat: **{}**\n\
         • Scammer: {display} (id `{actor_id}`)\n\
         {topic_line}\
         • Message link: {}",
        scope.title_or_unknown(),
        scope.message_link(message_id)
    )
}

pub fn membership_alert(
    scope: &ScopeInfo,
    change: MembershipChange,
    display: &str,
    actor_id: &str,
    topic: Option<&str>,
) -> String {
    let topic_line = topic
        .map(|t| format!("• Scammer topic: {t}\n"))
        .unwrap_or_default();
    format!(
        "🚨 **Scammer {} detected**\n\
         • Chat: **{}** (`{}`)\n\
         • Chat link: {}\n\
         • Scammer: {display} (id `{actor_id}`)\n\
         {topic_line}",
        change.as_str(),
        scope.title_or_unknown(),
        scope.id,
        scope.link()
    )
    .trim_end()
    .to_string()
}

pub fn join_message_alert(
    scope: &ScopeInfo,
    display: &str,
    actor_id: &str,
    topic: Option<&str>,
) -> String {
    let topic_line = topic
        .map(|t| format!("• Scammer topic: {t}\n"))
        .unwrap_or_default();
    format!(
        "🚨 **Scammer invited/added detected**\n\
         • Chat: **{}** (`{}`)\n\
         • Chat link: {}\n\
         • Scammer: {display} (id `{actor_id}`)\n\
         {topic_line}",
        scope.title_or_unknown(),
        scope.id,
        scope.link()
    )
    .trim_end()
    .to_string()
}
