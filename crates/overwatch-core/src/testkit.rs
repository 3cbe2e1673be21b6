//! Scripted gateway for driving the engine in tests.
//!
//! World state (actors, scopes, shared chats) is seeded up front; every
//! outbound call is recorded; failures are queued per operation and
//! consumed one call at a time, so a test can make exactly the first
//! attempt fail.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use overwatch_client::{Gateway, GatewayError, Result};
use overwatch_denylist::DenyListSnapshot;
use overwatch_types::{
    ActorProfile, FlaggedActor, GatewayEvent, PresenceStatus, ScopeId, ScopeInfo, ScopeKind,
    SendTarget, SentMessage,
};

/// One observed outbound send.
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub target: SendTarget,
    pub text: String,
    pub schedule_in: Option<Duration>,
}

#[derive(Default)]
pub struct ScriptedGateway {
    // call records tests assert against
    pub sent: Mutex<Vec<SentRecord>>,
    pub deleted: Mutex<Vec<(ScopeId, Vec<i64>, bool)>>,
    pub blocked: Mutex<Vec<String>>,
    pub recent_limits: Mutex<Vec<usize>>,
    pub handle_lookups: Mutex<Vec<String>>,

    // seeded world
    actors: Mutex<HashMap<String, ActorProfile>>,
    handles: Mutex<HashMap<String, ActorProfile>>,
    common: Mutex<HashMap<String, Vec<ScopeId>>>,
    recent: Mutex<HashMap<ScopeId, Vec<ActorProfile>>>,
    rosters: Mutex<HashMap<ScopeId, Vec<ActorProfile>>>,
    scopes: Mutex<Vec<ScopeInfo>>,
    events: Mutex<VecDeque<GatewayEvent>>,

    // queued failures, consumed front-first
    send_errors: Mutex<VecDeque<GatewayError>>,
    delete_errors: Mutex<VecDeque<GatewayError>>,
    common_errors: Mutex<VecDeque<GatewayError>>,
    roster_errors: Mutex<VecDeque<GatewayError>>,
    block_errors: Mutex<VecDeque<GatewayError>>,

    common_calls: Mutex<usize>,
    next_message_id: Mutex<i64>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_actor(&self, profile: ActorProfile) {
        self.actors.lock().insert(profile.id.clone(), profile);
    }

    pub fn insert_handle(&self, handle: &str, profile: ActorProfile) {
        self.handles.lock().insert(handle.to_string(), profile);
    }

    pub fn set_common_scopes(&self, actor_id: &str, scopes: Vec<ScopeId>) {
        self.common.lock().insert(actor_id.to_string(), scopes);
    }

    pub fn set_recent_participants(&self, scope_id: ScopeId, participants: Vec<ActorProfile>) {
        self.recent.lock().insert(scope_id, participants);
    }

    pub fn set_participants(&self, scope_id: ScopeId, participants: Vec<ActorProfile>) {
        self.rosters.lock().insert(scope_id, participants);
    }

    pub fn set_scope_list(&self, scopes: Vec<ScopeInfo>) {
        *self.scopes.lock() = scopes;
    }

    /// Queues an event for the next [`Gateway::listen`] call to replay.
    pub fn queue_event(&self, event: GatewayEvent) {
        self.events.lock().push_back(event);
    }

    pub fn push_send_error(&self, e: GatewayError) {
        self.send_errors.lock().push_back(e);
    }

    pub fn push_delete_error(&self, e: GatewayError) {
        self.delete_errors.lock().push_back(e);
    }

    pub fn push_common_scopes_error(&self, e: GatewayError) {
        self.common_errors.lock().push_back(e);
    }

    pub fn push_participants_error(&self, e: GatewayError) {
        self.roster_errors.lock().push_back(e);
    }

    pub fn push_block_error(&self, e: GatewayError) {
        self.block_errors.lock().push_back(e);
    }

    pub fn common_scope_calls(&self) -> usize {
        *self.common_calls.lock()
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn me(&self) -> Result<ActorProfile> {
        Ok(actor("100100100", Some("watcher"), PresenceStatus::Online))
    }

    async fn listen(&self, tx: mpsc::Sender<GatewayEvent>) -> Result<()> {
        let queued: Vec<GatewayEvent> = self.events.lock().drain(..).collect();
        for event in queued {
            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn send_message(
        &self,
        target: SendTarget,
        text: &str,
        schedule_in: Option<Duration>,
    ) -> Result<SentMessage> {
        if let Some(e) = self.send_errors.lock().pop_front() {
            return Err(e);
        }
        let message_id = {
            let mut next = self.next_message_id.lock();
            *next += 1;
            *next
        };
        self.sent.lock().push(SentRecord {
            target,
            text: text.to_string(),
            schedule_in,
        });
        Ok(SentMessage {
            message_id,
            ts: Utc::now(),
        })
    }

    async fn delete_messages(
        &self,
        scope_id: ScopeId,
        message_ids: &[i64],
        revoke: bool,
    ) -> Result<()> {
        if let Some(e) = self.delete_errors.lock().pop_front() {
            return Err(e);
        }
        self.deleted
            .lock()
            .push((scope_id, message_ids.to_vec(), revoke));
        Ok(())
    }

    async fn resolve_actor(&self, actor_id: &str) -> Result<ActorProfile> {
        self.actors
            .lock()
            .get(actor_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("actor {actor_id}")))
    }

    async fn resolve_handle(&self, handle: &str) -> Result<ActorProfile> {
        self.handle_lookups.lock().push(handle.to_string());
        self.handles
            .lock()
            .get(handle)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("handle {handle}")))
    }

    async fn list_scopes(&self) -> Result<Vec<ScopeInfo>> {
        Ok(self.scopes.lock().clone())
    }

    async fn scope_info(&self, scope_id: ScopeId) -> Result<ScopeInfo> {
        self.scopes
            .lock()
            .iter()
            .find(|s| s.id == scope_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("scope {scope_id}")))
    }

    async fn participants(&self, scope_id: ScopeId) -> Result<Vec<ActorProfile>> {
        if let Some(e) = self.roster_errors.lock().pop_front() {
            return Err(e);
        }
        self.rosters
            .lock()
            .get(&scope_id)
            .cloned()
            .ok_or_else(|| GatewayError::Unsupported(format!("participants of {scope_id}")))
    }

    async fn recent_participants(
        &self,
        scope_id: ScopeId,
        limit: usize,
    ) -> Result<Vec<ActorProfile>> {
        self.recent_limits.lock().push(limit);
        self.recent
            .lock()
            .get(&scope_id)
            .cloned()
            .ok_or_else(|| GatewayError::Unsupported(format!("recent participants of {scope_id}")))
    }

    async fn common_scopes(&self, actor_id: &str) -> Result<Vec<ScopeId>> {
        *self.common_calls.lock() += 1;
        if let Some(e) = self.common_errors.lock().pop_front() {
            return Err(e);
        }
        Ok(self.common.lock().get(actor_id).cloned().unwrap_or_default())
    }

    async fn block_actor(&self, handle: &str) -> Result<()> {
        if let Some(e) = self.block_errors.lock().pop_front() {
            return Err(e);
        }
        self.blocked.lock().push(handle.to_string());
        Ok(())
    }
}

// ── fixture constructors ──

pub fn actor(id: &str, handle: Option<&str>, status: PresenceStatus) -> ActorProfile {
    ActorProfile {
        id: id.to_string(),
        handle: handle.map(|s| s.to_string()),
        first_name: None,
        last_name: None,
        status,
    }
}

pub fn flagged(
    username: Option<&str>,
    full_name: Option<&str>,
    topic_id: Option<i64>,
) -> FlaggedActor {
    FlaggedActor {
        topic_id,
        reason: None,
        username: username.map(|s| s.to_string()),
        full_name: full_name.map(|s| s.to_string()),
    }
}

pub fn scope(id: ScopeId, title: Option<&str>, handle: Option<&str>) -> ScopeInfo {
    ScopeInfo {
        id,
        title: title.map(|s| s.to_string()),
        handle: handle.map(|s| s.to_string()),
        kind: ScopeKind::Group,
        participant_count: None,
    }
}

pub fn snapshot(entries: &[(&str, FlaggedActor)]) -> DenyListSnapshot {
    let records = entries
        .iter()
        .map(|(id, record)| (id.to_string(), record.clone()))
        .collect();
    DenyListSnapshot::new(records)
}
