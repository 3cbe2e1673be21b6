use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use overwatch_types::{ActorProfile, GatewayEvent, ScopeId, ScopeInfo, SendTarget, SentMessage};

use crate::error::Result;

/// The engine's view of the stateful userbot session: a live event feed
/// plus the outbound operations the monitoring policy needs. Everything
/// that talks to the platform goes through this boundary, so tests drive
/// the engine with scripted implementations.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Profile of the account the session is authenticated as.
    async fn me(&self) -> Result<ActorProfile>;

    /// Streams events into `tx` until the connection is lost (Err) or the
    /// receiver is dropped (Ok). Events must be delivered in arrival order.
    async fn listen(&self, tx: mpsc::Sender<GatewayEvent>) -> Result<()>;

    /// Sends `text`, optionally scheduled `schedule_in` into the future so
    /// it lands as a reminder instead of a silent delivery.
    async fn send_message(
        &self,
        target: SendTarget,
        text: &str,
        schedule_in: Option<Duration>,
    ) -> Result<SentMessage>;

    /// Deletes messages; `revoke` removes them for all participants.
    async fn delete_messages(
        &self,
        scope_id: ScopeId,
        message_ids: &[i64],
        revoke: bool,
    ) -> Result<()>;

    async fn resolve_actor(&self, actor_id: &str) -> Result<ActorProfile>;

    async fn resolve_handle(&self, handle: &str) -> Result<ActorProfile>;

    async fn list_scopes(&self) -> Result<Vec<ScopeInfo>>;

    async fn scope_info(&self, scope_id: ScopeId) -> Result<ScopeInfo>;

    async fn participants(&self, scope_id: ScopeId) -> Result<Vec<ActorProfile>>;

    /// Most recently active participants, bounded to one page.
    async fn recent_participants(
        &self,
        scope_id: ScopeId,
        limit: usize,
    ) -> Result<Vec<ActorProfile>>;

    /// Scopes shared between the session account and `actor_id`.
    async fn common_scopes(&self, actor_id: &str) -> Result<Vec<ScopeId>>;

    async fn block_actor(&self, handle: &str) -> Result<()>;
}
