//! Alert delivery policy.
//!
//! One alert flows through up to three channels depending on the report
//! mode: the log, a scheduled reminder into the operator's saved
//! messages, and a rate-limited message into the scope where the flagged
//! actor was seen. The dedup ledger is consulted and written before any
//! delivery starts, so the same logical alert never fans out twice even
//! when events race.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use overwatch_client::Gateway;
use overwatch_types::{GroupSendKey, NotificationKey, ReportMode, SendTarget, SentMessage};

use crate::state::{OwnAlertRecord, SharedState};

/// Operator reminders are scheduled this far ahead so they ping instead
/// of landing silently.
pub const REMINDER_DELAY_SECS: u64 = 5 * 60;

pub struct AlertPolicy {
    gateway: Arc<dyn Gateway>,
    state: SharedState,
    mode: ReportMode,
}

impl AlertPolicy {
    pub fn new(gateway: Arc<dyn Gateway>, state: SharedState, mode: ReportMode) -> Self {
        Self {
            gateway,
            state,
            mode,
        }
    }

    pub fn mode(&self) -> ReportMode {
        self.mode
    }

    /// Applies the short dedup window, then delivers `text` according to
    /// the report mode. In-scope deliveries that go through are recorded
    /// as own alerts for the duplicate detector.
    pub async fn notify(&self, key: NotificationKey, text: &str) {
        let now = Utc::now();
        if !self.state.should_notify(&key, now) {
            return;
        }

        if self.mode.private_reminder() {
            self.send_reminder(text).await;
        }

        if self.mode.group_delivery() {
            let sent = self
                .send_to_scope_with_daily_limit(&GroupSendKey::new(key.scope_id, &key.actor_id), text)
                .await;
            if let Some(sent) = sent {
                let mut actor_ids = HashSet::new();
                actor_ids.insert(key.actor_id.clone());
                self.state.record_own_alert(
                    key.scope_id,
                    OwnAlertRecord {
                        message_id: sent.message_id,
                        ts: sent.ts,
                        actor_ids,
                    },
                    Utc::now(),
                );
            }
        }
    }

    /// Schedules the alert into saved messages. A flood wait is honored
    /// and the send retried exactly once; any other failure is logged and
    /// dropped.
    async fn send_reminder(&self, text: &str) {
        let delay = Some(Duration::from_secs(REMINDER_DELAY_SECS));
        let first = self
            .gateway
            .send_message(SendTarget::Operator, text, delay)
            .await;
        let Err(e) = first else { return };

        let Some(wait) = e.flood_wait() else {
            error!("failed to schedule operator reminder: {e}");
            return;
        };
        warn!(
            "flood wait while scheduling reminder: sleeping {}s then retrying once",
            wait.as_secs()
        );
        tokio::time::sleep(wait).await;
        if let Err(e) = self
            .gateway
            .send_message(SendTarget::Operator, text, delay)
            .await
        {
            error!("failed to schedule operator reminder: {e}");
        }
    }

    /// Sends into the scope unless this (scope, actor) pair already got an
    /// alert within the cap window. The ledger is only written after a
    /// successful send. Flood waits suppress the send without retrying.
    async fn send_to_scope_with_daily_limit(
        &self,
        key: &GroupSendKey,
        text: &str,
    ) -> Option<SentMessage> {
        let now = Utc::now();
        if !self.state.group_send_allowed(key, now) {
            info!(
                "group alert suppressed (daily limit) for flagged actor {} in scope {}",
                key.actor_id, key.scope_id
            );
            return None;
        }

        match self
            .gateway
            .send_message(SendTarget::Scope(key.scope_id), text, None)
            .await
        {
            Ok(sent) => {
                self.state.record_group_send(key.clone(), now);
                Some(sent)
            }
            Err(e) => {
                if let Some(wait) = e.flood_wait() {
                    warn!(
                        "flood wait while sending to scope {}: sleeping {}s (suppressing this send)",
                        key.scope_id,
                        wait.as_secs()
                    );
                    tokio::time::sleep(wait).await;
                } else {
                    error!("failed to deliver alert to scope {}: {e}", key.scope_id);
                }
                None
            }
        }
    }
}
