//! Session lifecycle.
//!
//! `run_forever` owns the reconnect loop: fetch a deny list, run one
//! monitoring session, and on disconnect retry with doubling backoff.
//! `run_session` wires the dispatcher to the live feed and supervises the
//! periodic tasks (refreshers, watchdog, persistence, update checks) for
//! the lifetime of one connection.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use overwatch_client::Gateway;
use overwatch_denylist::{DenyListClient, DenyListSnapshot};
use overwatch_types::ReportMode;

use crate::dispatcher::EventDispatcher;
use crate::policy::AlertPolicy;
use crate::refresh::{
    build_scope_allowlist, refresh_allowlist_periodically, refresh_deny_list_periodically,
    ALLOWLIST_REFRESH_SECONDS, DENY_LIST_REFRESH_SECONDS,
};
use crate::state::SharedState;
use crate::store::{load_state, save_state, persist_periodically, STATE_FILE_NAME};
use crate::update::{check_updates_periodically, UpdateChecker, UPDATE_CHECK_SECONDS};
use crate::verifier::JoinVerifier;
use crate::watchdog::{life_check_periodically, IDLE_RESTART_SECONDS, LIFE_CHECK_SECONDS};

pub const RECONNECT_BACKOFF_START_SECONDS: u64 = 5;
pub const RECONNECT_BACKOFF_MAX_SECONDS: u64 = 300;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: ReportMode,
    pub deny_list_url: String,
    pub release_manifest_url: String,
    /// Directory holding the durable state file.
    pub state_dir: PathBuf,
    pub local_version: String,
}

/// Why a session stopped, seen from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The event feed ended or the connection dropped.
    Disconnected,
    /// The watchdog asked for a full process restart.
    RestartRequested,
    /// Operator shutdown.
    Stopped,
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(Duration::from_secs(RECONNECT_BACKOFF_MAX_SECONDS))
}

/// Sleeps for `wait` unless shutdown arrives first, returning whether it did.
async fn wait_or_shutdown(shutdown: &CancellationToken, wait: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(wait) => false,
    }
}

/// Runs monitoring sessions until the operator stops the process or a
/// restart is requested. Disconnects reconnect with doubling backoff; the
/// backoff resets once a session gets as far as a usable deny list.
pub async fn run_forever(
    gateway: Arc<dyn Gateway>,
    config: EngineConfig,
    shutdown: CancellationToken,
) -> SessionEnd {
    let mut backoff = Duration::from_secs(RECONNECT_BACKOFF_START_SECONDS);
    loop {
        if shutdown.is_cancelled() {
            return SessionEnd::Stopped;
        }

        let deny_client = DenyListClient::new(&config.deny_list_url);
        let snapshot = match deny_client.fetch().await {
            Ok(snapshot) if !snapshot.is_empty() => snapshot,
            Ok(_) => {
                warn!(
                    "no flagged actors loaded; retrying in {}s",
                    backoff.as_secs()
                );
                if wait_or_shutdown(&shutdown, backoff).await {
                    return SessionEnd::Stopped;
                }
                backoff = next_backoff(backoff);
                continue;
            }
            Err(e) => {
                error!(
                    "deny-list fetch failed: {e}; retrying in {}s",
                    backoff.as_secs()
                );
                if wait_or_shutdown(&shutdown, backoff).await {
                    return SessionEnd::Stopped;
                }
                backoff = next_backoff(backoff);
                continue;
            }
        };
        backoff = Duration::from_secs(RECONNECT_BACKOFF_START_SECONDS);

        match run_session(gateway.clone(), &config, snapshot, deny_client, &shutdown).await {
            SessionEnd::Disconnected => {
                warn!("session ended; reconnecting in {}s", backoff.as_secs());
                if wait_or_shutdown(&shutdown, backoff).await {
                    return SessionEnd::Stopped;
                }
                backoff = next_backoff(backoff);
            }
            end => return end,
        }
    }
}

/// One monitoring session over an established gateway.
pub async fn run_session(
    gateway: Arc<dyn Gateway>,
    config: &EngineConfig,
    snapshot: DenyListSnapshot,
    deny_client: DenyListClient,
    shutdown: &CancellationToken,
) -> SessionEnd {
    info!(
        "passive monitoring enabled (reporting: {})",
        config.mode.describe()
    );

    let state = SharedState::new();
    let state_path = config.state_dir.join(STATE_FILE_NAME);
    state.hydrate(load_state(&state_path).await);

    info!("{} flagged actors loaded", snapshot.len());
    state.set_deny_list(snapshot);

    let me = match gateway.me().await {
        Ok(profile) => profile,
        Err(e) => {
            error!("could not read own profile: {e}");
            return SessionEnd::Disconnected;
        }
    };
    info!("signed in as {}", me.display_name());

    match build_scope_allowlist(gateway.as_ref()).await {
        Ok(allow) => {
            info!("monitoring {} scopes", allow.len());
            state.set_allowlist(allow);
        }
        Err(e) => {
            error!("could not build scope allowlist: {e}");
            return SessionEnd::Disconnected;
        }
    }

    let session_cancel = shutdown.child_token();
    let policy = Arc::new(AlertPolicy::new(gateway.clone(), state.clone(), config.mode));
    let verifier = Arc::new(JoinVerifier::new(
        gateway.clone(),
        state.clone(),
        policy.clone(),
    ));
    let dispatcher = EventDispatcher::new(gateway.clone(), state.clone(), policy, verifier);

    let mut tasks: JoinSet<()> = JoinSet::new();
    tasks.spawn(refresh_deny_list_periodically(
        deny_client,
        state.clone(),
        session_cancel.clone(),
        Duration::from_secs(DENY_LIST_REFRESH_SECONDS),
    ));
    tasks.spawn(refresh_allowlist_periodically(
        gateway.clone(),
        state.clone(),
        session_cancel.clone(),
        Duration::from_secs(ALLOWLIST_REFRESH_SECONDS),
    ));
    tasks.spawn(life_check_periodically(
        state.clone(),
        session_cancel.clone(),
        Duration::from_secs(LIFE_CHECK_SECONDS),
        Duration::from_secs(IDLE_RESTART_SECONDS),
    ));
    tasks.spawn(persist_periodically(
        state.clone(),
        state_path.clone(),
        session_cancel.clone(),
    ));
    tasks.spawn(check_updates_periodically(
        UpdateChecker::new(&config.release_manifest_url, &config.local_version),
        session_cancel.clone(),
        Duration::from_secs(UPDATE_CHECK_SECONDS),
    ));

    let (tx, mut rx) = mpsc::channel(64);
    let listen_gateway = gateway.clone();
    let listen_handle = tokio::spawn(async move {
        if let Err(e) = listen_gateway.listen(tx).await {
            error!("event feed failed: {e}");
        }
    });

    info!("monitoring is running");
    let end = loop {
        if session_cancel.is_cancelled() {
            break stop_reason(&state);
        }
        tokio::select! {
            _ = session_cancel.cancelled() => break stop_reason(&state),
            event = rx.recv() => match event {
                Some(event) => dispatcher.handle(event).await,
                None => break SessionEnd::Disconnected,
            }
        }
    };

    session_cancel.cancel();
    listen_handle.abort();
    tasks.shutdown().await;
    // one last flush so the daily caps survive the restart
    save_state(&state_path, &state.export(Utc::now())).await;
    info!("session ended: {end:?}");
    end
}

fn stop_reason(state: &SharedState) -> SessionEnd {
    if state.restart_requested() {
        SessionEnd::RestartRequested
    } else {
        SessionEnd::Stopped
    }
}

/// Replaces the running process with a fresh copy of itself, preserving
/// arguments and environment. Returns only on failure.
#[cfg(unix)]
pub fn restart_process() -> std::io::Error {
    use std::os::unix::process::CommandExt;
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => return e,
    };
    info!("restarting process in place");
    std::process::Command::new(exe)
        .args(std::env::args_os().skip(1))
        .exec()
}

/// Spawns a replacement and exits; the platform has no in-place exec.
#[cfg(not(unix))]
pub fn restart_process() -> std::io::Error {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => return e,
    };
    info!("restarting via spawned replacement");
    match std::process::Command::new(exe)
        .args(std::env::args_os().skip(1))
        .spawn()
    {
        Ok(_) => std::process::exit(0),
        Err(e) => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{flagged, scope, snapshot, ScriptedGateway};
    use overwatch_types::{ContentEvent, GatewayEvent, ScopeInfo, SendTarget};

    fn config(dir: &std::path::Path) -> EngineConfig {
        EngineConfig {
            mode: ReportMode::Reminder,
            // nothing listens on the discard port, fetches fail fast
            deny_list_url: "http://127.0.0.1:9/deny.json".to_string(),
            release_manifest_url: "http://127.0.0.1:9/release.json".to_string(),
            state_dir: dir.to_path_buf(),
            local_version: "0.3.6".to_string(),
        }
    }

    fn group(id: i64, title: &str, count: i64) -> ScopeInfo {
        ScopeInfo {
            participant_count: Some(count),
            ..scope(id, Some(title), None)
        }
    }

    fn content(scope_id: i64, actor: &str) -> GatewayEvent {
        GatewayEvent::Content(ContentEvent {
            scope_id,
            message_id: 42,
            actor_id: Some(actor.to_string()),
            text: "wire me usdt".to_string(),
            outgoing: false,
            sent_at: Utc::now(),
            added_actor_ids: vec![],
        })
    }

    #[tokio::test]
    async fn session_processes_feed_then_reports_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.set_scope_list(vec![group(-5, "Trading Floor", 25)]);
        gateway.queue_event(content(-5, "7777777"));

        let cfg = config(dir.path());
        let end = run_session(
            gateway.clone(),
            &cfg,
            snapshot(&[("7777777", flagged(Some("bad_guy"), None, None))]),
            DenyListClient::new(&cfg.deny_list_url),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(end, SessionEnd::Disconnected);
        let sent = gateway.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, SendTarget::Operator);
        assert!(sent[0].text.contains("**Scammer message detected**"));
        // durable ledgers were flushed on the way out
        assert!(dir.path().join(STATE_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn cancelled_shutdown_stops_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::new());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let cfg = config(dir.path());
        let end = run_session(
            gateway.clone(),
            &cfg,
            snapshot(&[]),
            DenyListClient::new(&cfg.deny_list_url),
            &shutdown,
        )
        .await;
        assert_eq!(end, SessionEnd::Stopped);
    }

    #[tokio::test]
    async fn session_state_survives_to_the_next_session() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.set_scope_list(vec![group(-5, "Trading Floor", 25)]);
        gateway.queue_event(content(-5, "7777777"));

        let cfg = config(dir.path());
        let deny = [("7777777", flagged(Some("bad_guy"), None, None))];
        run_session(
            gateway.clone(),
            &cfg,
            snapshot(&deny),
            DenyListClient::new(&cfg.deny_list_url),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(gateway.sent.lock().len(), 1);

        // same event again: the persisted dedup ledger suppresses it
        gateway.queue_event(content(-5, "7777777"));
        run_session(
            gateway.clone(),
            &cfg,
            snapshot(&deny),
            DenyListClient::new(&cfg.deny_list_url),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(gateway.sent.lock().len(), 1);
    }

    #[test]
    fn backoff_doubles_to_a_cap() {
        let mut backoff = Duration::from_secs(RECONNECT_BACKOFF_START_SECONDS);
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(backoff.as_secs());
            backoff = next_backoff(backoff);
        }
        assert_eq!(seen, vec![5, 10, 20, 40, 80, 160, 300, 300]);
    }
}
