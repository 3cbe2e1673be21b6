//! Periodic refresh of the deny list and the scope allowlist.
//!
//! Both refreshers sleep first and fetch after, since the session always
//! builds a fresh copy of each at startup. A failed or empty refresh
//! keeps the previous data; stale is strictly better than nothing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use overwatch_client::Gateway;
use overwatch_denylist::DenyListClient;
use overwatch_types::{ScopeId, ScopeKind};

use crate::state::SharedState;

pub const DENY_LIST_REFRESH_SECONDS: u64 = 60 * 60;
pub const ALLOWLIST_REFRESH_SECONDS: u64 = 12 * 60 * 60;

/// Group scopes with more than two participants. Everything else is
/// either a broadcast feed, a one-on-one chat, or a scope the count is
/// unknown for, none of which are monitored.
pub async fn build_scope_allowlist(
    gateway: &dyn Gateway,
) -> overwatch_client::Result<HashSet<ScopeId>> {
    let scopes = gateway.list_scopes().await?;
    let mut allow = HashSet::new();
    for scope in scopes {
        if !matches!(scope.kind, ScopeKind::Group) {
            continue;
        }
        if scope.participant_count.is_some_and(|count| count > 2) {
            allow.insert(scope.id);
        }
    }
    Ok(allow)
}

pub async fn refresh_deny_list_periodically(
    client: DenyListClient,
    state: SharedState,
    cancel: CancellationToken,
    interval: Duration,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        info!("refresh: fetching updated deny list");
        match client.fetch().await {
            Ok(snapshot) if snapshot.is_empty() => {
                warn!("refresh: deny list came back empty; keeping previous snapshot");
            }
            Ok(snapshot) => {
                let count = snapshot.len();
                state.set_deny_list(snapshot);
                info!("refresh: deny list updated: {count} flagged actors");
            }
            Err(e) => error!("refresh: failed to update deny list: {e}"),
        }
    }
}

pub async fn refresh_allowlist_periodically(
    gateway: Arc<dyn Gateway>,
    state: SharedState,
    cancel: CancellationToken,
    interval: Duration,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        info!("refresh: fetching updated scopes / allowlist");
        match build_scope_allowlist(gateway.as_ref()).await {
            Ok(allow) => {
                let count = allow.len();
                state.set_allowlist(allow);
                info!("refresh: allowlist updated: {count} scopes");
            }
            Err(e) => error!("refresh: failed to update allowlist: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{scope, ScriptedGateway};
    use overwatch_types::ScopeInfo;

    fn group(id: ScopeId, count: Option<i64>) -> ScopeInfo {
        ScopeInfo {
            participant_count: count,
            ..scope(id, Some("some group"), None)
        }
    }

    #[tokio::test]
    async fn allowlist_keeps_groups_with_more_than_two_participants() {
        let gateway = ScriptedGateway::new();
        gateway.set_scope_list(vec![
            group(-1001, Some(150)),
            group(-1002, Some(2)),
            group(-1003, Some(3)),
            group(-1004, None),
            ScopeInfo {
                kind: ScopeKind::Broadcast,
                participant_count: Some(10_000),
                ..scope(-1005, Some("news feed"), None)
            },
        ]);

        let allow = build_scope_allowlist(&gateway).await.unwrap();
        assert_eq!(allow, HashSet::from([-1001, -1003]));
    }

    #[tokio::test]
    async fn allowlist_refresh_replaces_state() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.set_scope_list(vec![group(-1001, Some(5))]);
        let state = SharedState::new();
        state.set_allowlist(HashSet::from([-9]));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(refresh_allowlist_periodically(
            gateway.clone(),
            state.clone(),
            cancel.clone(),
            Duration::from_millis(5),
        ));
        tokio::time::sleep(Duration::from_millis(40)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(state.allows(-1001));
        assert!(!state.allows(-9));
    }
}
