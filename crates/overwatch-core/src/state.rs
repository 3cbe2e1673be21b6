//! Shared in-memory session state.
//!
//! Everything the event handlers and periodic tasks touch concurrently
//! lives behind one mutex: the scope allowlist, the current deny-list
//! snapshot, the dedup and delivery-cap ledgers, the own-alert tracking
//! used by the duplicate detector, and the restart flag. Accessors take
//! and release the lock internally so callers cannot hold it across an
//! await point; methods that must check-then-record do both under a
//! single acquisition.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use overwatch_denylist::DenyListSnapshot;
use overwatch_types::{GroupSendKey, NotificationKey, ScopeId};

use crate::store::{epoch_seconds, from_epoch_seconds, PersistedState, STATE_VERSION};

/// Identical alerts inside this window collapse into one.
pub const DEDUPE_SECONDS: i64 = 30;

/// At most one in-scope delivery per (scope, actor) within this window.
pub const GROUP_LIMIT_SECONDS: i64 = 86_400;

/// How far back an own alert counts when looking for duplicates.
pub const DUPLICATE_WINDOW_SECONDS: i64 = 10 * 60;

/// Own-alert records older than this are pruned outright.
pub const DUPLICATE_PRUNE_SECONDS: i64 = 12 * 60;

/// One alert message this session delivered into a scope, remembered just
/// long enough to recognize someone else's copy of the same report.
#[derive(Debug, Clone)]
pub struct OwnAlertRecord {
    pub message_id: i64,
    pub ts: DateTime<Utc>,
    pub actor_ids: HashSet<String>,
}

#[derive(Default)]
struct EngineState {
    allowlist: HashSet<ScopeId>,
    deny_list: Arc<DenyListSnapshot>,
    last_event_ts: Option<DateTime<Utc>>,
    group_send: HashMap<GroupSendKey, DateTime<Utc>>,
    notifications: HashMap<NotificationKey, DateTime<Utc>>,
    own_alerts: HashMap<ScopeId, VecDeque<OwnAlertRecord>>,
    own_recent_actors: HashMap<ScopeId, HashMap<String, DateTime<Utc>>>,
    restart_requested: bool,
}

/// Cloneable handle to the session state.
#[derive(Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<EngineState>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    // ── allowlist ──

    pub fn allows(&self, scope_id: ScopeId) -> bool {
        self.inner.lock().allowlist.contains(&scope_id)
    }

    pub fn set_allowlist(&self, scopes: HashSet<ScopeId>) {
        self.inner.lock().allowlist = scopes;
    }

    pub fn allowlist_len(&self) -> usize {
        self.inner.lock().allowlist.len()
    }

    // ── deny list ──

    pub fn deny_list(&self) -> Arc<DenyListSnapshot> {
        self.inner.lock().deny_list.clone()
    }

    pub fn set_deny_list(&self, snapshot: DenyListSnapshot) {
        self.inner.lock().deny_list = Arc::new(snapshot);
    }

    // ── liveness ──

    pub fn note_event(&self, now: DateTime<Utc>) {
        self.inner.lock().last_event_ts = Some(now);
    }

    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_event_ts
    }

    // ── alert ledgers ──

    /// Returns whether an alert identified by `key` should go out, and if
    /// so records it, so a racing duplicate sees the timestamp before the
    /// first delivery even starts.
    pub fn should_notify(&self, key: &NotificationKey, now: DateTime<Utc>) -> bool {
        let mut state = self.inner.lock();
        if let Some(last) = state.notifications.get(key) {
            if now - *last < Duration::seconds(DEDUPE_SECONDS) {
                return false;
            }
        }
        state.notifications.insert(key.clone(), now);
        true
    }

    pub fn group_send_allowed(&self, key: &GroupSendKey, now: DateTime<Utc>) -> bool {
        let state = self.inner.lock();
        match state.group_send.get(key) {
            Some(last) => now - *last >= Duration::seconds(GROUP_LIMIT_SECONDS),
            None => true,
        }
    }

    /// Recorded only after the delivery succeeded; a failed send must not
    /// burn the daily slot.
    pub fn record_group_send(&self, key: GroupSendKey, now: DateTime<Utc>) {
        self.inner.lock().group_send.insert(key, now);
    }

    // ── own-alert tracking ──

    pub fn record_own_alert(&self, scope_id: ScopeId, record: OwnAlertRecord, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(DUPLICATE_PRUNE_SECONDS);
        let mut state = self.inner.lock();

        let recent = state.own_recent_actors.entry(scope_id).or_default();
        for actor in &record.actor_ids {
            recent.insert(actor.clone(), record.ts);
        }
        recent.retain(|_, ts| *ts >= cutoff);

        let alerts = state.own_alerts.entry(scope_id).or_default();
        alerts.push_back(record);
        while alerts.front().is_some_and(|a| a.ts < cutoff) {
            alerts.pop_front();
        }
    }

    /// Looks for own recent alerts that overlap `candidate_actors`. Returns
    /// `None` when no recently-alerted actor overlaps; otherwise the
    /// overlapping ids plus every own alert inside the duplicate window
    /// that mentions one of them. Prunes expired records along the way.
    pub fn duplicate_candidates(
        &self,
        scope_id: ScopeId,
        candidate_actors: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Option<(HashSet<String>, Vec<OwnAlertRecord>)> {
        let cutoff = now - Duration::seconds(DUPLICATE_WINDOW_SECONDS);
        let prune_cutoff = now - Duration::seconds(DUPLICATE_PRUNE_SECONDS);
        let mut state = self.inner.lock();

        let recent = state.own_recent_actors.entry(scope_id).or_default();
        let overlap: HashSet<String> = recent
            .iter()
            .filter(|(actor, ts)| **ts >= cutoff && candidate_actors.contains(*actor))
            .map(|(actor, _)| actor.clone())
            .collect();
        if overlap.is_empty() {
            return None;
        }
        recent.retain(|_, ts| *ts >= prune_cutoff);

        let alerts = state.own_alerts.entry(scope_id).or_default();
        while alerts.front().is_some_and(|a| a.ts < prune_cutoff) {
            alerts.pop_front();
        }
        let matching = alerts
            .iter()
            .filter(|a| a.ts >= cutoff && !a.actor_ids.is_disjoint(&overlap))
            .cloned()
            .collect();

        Some((overlap, matching))
    }

    /// Drops tracking for the given alert messages whether or not their
    /// deletion went through.
    pub fn untrack_own_alerts(&self, scope_id: ScopeId, message_ids: &[i64]) {
        let mut state = self.inner.lock();
        if let Some(alerts) = state.own_alerts.get_mut(&scope_id) {
            alerts.retain(|a| !message_ids.contains(&a.message_id));
        }
    }

    // ── restart flag ──

    /// Marks the session for restart. Returns whether this call was the
    /// one that set the flag.
    pub fn request_restart(&self) -> bool {
        let mut state = self.inner.lock();
        if state.restart_requested {
            return false;
        }
        state.restart_requested = true;
        true
    }

    pub fn restart_requested(&self) -> bool {
        self.inner.lock().restart_requested
    }

    // ── persistence ──

    /// Snapshot of the durable portion of the state. Own-alert tracking is
    /// deliberately volatile: after a restart there is nothing of ours left
    /// to delete.
    pub fn export(&self, now: DateTime<Utc>) -> PersistedState {
        let state = self.inner.lock();

        let mut allowlist: Vec<ScopeId> = state.allowlist.iter().copied().collect();
        allowlist.sort_unstable();

        PersistedState {
            version: STATE_VERSION,
            saved_at: now.timestamp(),
            allowlist,
            last_event_ts: state.last_event_ts.map(epoch_seconds),
            group_send: state
                .group_send
                .iter()
                .map(|(key, ts)| (key.encode(), epoch_seconds(*ts)))
                .collect(),
            notifications: state
                .notifications
                .iter()
                .map(|(key, ts)| (key.encode(), epoch_seconds(*ts)))
                .collect(),
        }
    }

    /// Re-seeds the durable ledgers from a loaded snapshot. Entries whose
    /// keys or timestamps fail to decode are skipped.
    pub fn hydrate(&self, persisted: PersistedState) {
        let mut allowlist = HashSet::new();
        allowlist.extend(persisted.allowlist.iter().copied());

        let last_event_ts = persisted.last_event_ts.and_then(from_epoch_seconds);

        let mut group_send = HashMap::new();
        for (raw, secs) in &persisted.group_send {
            let Some(key) = GroupSendKey::decode(raw) else {
                continue;
            };
            let Some(ts) = from_epoch_seconds(*secs) else {
                continue;
            };
            group_send.insert(key, ts);
        }

        let mut notifications = HashMap::new();
        for (raw, secs) in &persisted.notifications {
            let Some(key) = NotificationKey::decode(raw) else {
                continue;
            };
            let Some(ts) = from_epoch_seconds(*secs) else {
                continue;
            };
            notifications.insert(key, ts);
        }

        tracing::info!(
            "loaded persisted state: allowlist={}, group_send={}, notifications={}, last_event_ts={}",
            allowlist.len(),
            group_send.len(),
            notifications.len(),
            if last_event_ts.is_some() { "set" } else { "none" }
        );

        let mut state = self.inner.lock();
        state.allowlist = allowlist;
        state.last_event_ts = last_event_ts;
        state.group_send = group_send;
        state.notifications = notifications;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overwatch_types::AlertKind;

    fn key(corr: &str) -> NotificationKey {
        NotificationKey::new(AlertKind::Content, -100500, "7777777", corr)
    }

    // ── dedup ledger ──

    #[test]
    fn dedup_blocks_repeats_inside_window() {
        let state = SharedState::new();
        let t0 = Utc::now();
        assert!(state.should_notify(&key("1"), t0));
        assert!(!state.should_notify(&key("1"), t0 + Duration::seconds(10)));
        assert!(state.should_notify(&key("1"), t0 + Duration::seconds(31)));
    }

    #[test]
    fn dedup_distinguishes_correlations() {
        let state = SharedState::new();
        let t0 = Utc::now();
        assert!(state.should_notify(&key("1"), t0));
        assert!(state.should_notify(&key("2"), t0));
    }

    #[test]
    fn first_check_records_the_timestamp() {
        let state = SharedState::new();
        let t0 = Utc::now();
        state.should_notify(&key("1"), t0);
        // second caller racing right behind the first must lose
        assert!(!state.should_notify(&key("1"), t0));
    }

    // ── group-send ledger ──

    #[test]
    fn group_cap_spans_a_day() {
        let state = SharedState::new();
        let t0 = Utc::now();
        let k = GroupSendKey::new(-100500, "7777777");
        assert!(state.group_send_allowed(&k, t0));
        state.record_group_send(k.clone(), t0);
        assert!(!state.group_send_allowed(&k, t0 + Duration::hours(23)));
        assert!(state.group_send_allowed(&k, t0 + Duration::hours(24)));
        // a different actor in the same scope is unaffected
        assert!(state.group_send_allowed(&GroupSendKey::new(-100500, "8888"), t0));
    }

    // ── own-alert tracking ──

    fn own(message_id: i64, ts: DateTime<Utc>, actors: &[&str]) -> OwnAlertRecord {
        OwnAlertRecord {
            message_id,
            ts,
            actor_ids: actors.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn duplicate_candidates_need_overlap() {
        let state = SharedState::new();
        let t0 = Utc::now();
        state.record_own_alert(-5, own(100, t0, &["1111111"]), t0);

        let miss: HashSet<String> = ["2222222".to_string()].into();
        assert!(state.duplicate_candidates(-5, &miss, t0).is_none());

        let hit: HashSet<String> = ["1111111".to_string()].into();
        let (overlap, matching) = state.duplicate_candidates(-5, &hit, t0).unwrap();
        assert_eq!(overlap.len(), 1);
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].message_id, 100);
    }

    #[test]
    fn duplicate_window_expires_records() {
        let state = SharedState::new();
        let t0 = Utc::now();
        state.record_own_alert(-5, own(100, t0, &["1111111"]), t0);

        let actors: HashSet<String> = ["1111111".to_string()].into();
        let later = t0 + Duration::seconds(DUPLICATE_WINDOW_SECONDS + 1);
        assert!(state.duplicate_candidates(-5, &actors, later).is_none());
    }

    #[test]
    fn own_alerts_are_scoped_per_chat() {
        let state = SharedState::new();
        let t0 = Utc::now();
        state.record_own_alert(-5, own(100, t0, &["1111111"]), t0);

        let actors: HashSet<String> = ["1111111".to_string()].into();
        assert!(state.duplicate_candidates(-6, &actors, t0).is_none());
    }

    #[test]
    fn untrack_removes_only_named_messages() {
        let state = SharedState::new();
        let t0 = Utc::now();
        state.record_own_alert(-5, own(100, t0, &["1111111"]), t0);
        state.record_own_alert(-5, own(101, t0, &["1111111"]), t0);

        state.untrack_own_alerts(-5, &[100]);
        let actors: HashSet<String> = ["1111111".to_string()].into();
        let (_, matching) = state.duplicate_candidates(-5, &actors, t0).unwrap();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].message_id, 101);
    }

    // ── restart flag ──

    #[test]
    fn restart_flag_sets_once() {
        let state = SharedState::new();
        assert!(!state.restart_requested());
        assert!(state.request_restart());
        assert!(!state.request_restart());
        assert!(state.restart_requested());
    }

    // ── persistence round trip ──

    #[test]
    fn export_then_hydrate_restores_ledgers() {
        let state = SharedState::new();
        let t0 = Utc::now();
        state.set_allowlist([-5, -6].into());
        state.note_event(t0);
        state.should_notify(&key("42"), t0);
        state.record_group_send(GroupSendKey::new(-5, "7777777"), t0);
        // own-alert tracking must not survive the round trip
        state.record_own_alert(-5, own(100, t0, &["7777777"]), t0);

        let snapshot = state.export(t0);
        assert_eq!(snapshot.version, STATE_VERSION);
        assert_eq!(snapshot.allowlist, vec![-6, -5]);

        let restored = SharedState::new();
        restored.hydrate(snapshot);
        assert!(restored.allows(-5));
        assert!(!restored.should_notify(&key("42"), t0 + Duration::seconds(5)));
        assert!(!restored.group_send_allowed(&GroupSendKey::new(-5, "7777777"), t0));
        let actors: HashSet<String> = ["7777777".to_string()].into();
        assert!(restored.duplicate_candidates(-5, &actors, t0).is_none());
        // timestamps survive with sub-second precision loss at worst
        let drift = (restored.last_event_at().unwrap() - t0).num_milliseconds().abs();
        assert!(drift < 10, "drift was {drift}ms");
    }

    #[test]
    fn hydrate_skips_undecodable_entries() {
        let state = SharedState::new();
        let mut persisted = PersistedState::default();
        persisted.version = STATE_VERSION;
        persisted
            .group_send
            .insert("not-a-valid-key".to_string(), 1.0);
        persisted
            .notifications
            .insert("msg|-5|777|x".to_string(), f64::NAN);
        state.hydrate(persisted);
        assert!(state.group_send_allowed(&GroupSendKey::new(-5, "777"), Utc::now()));
    }
}
