use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use overwatch_client::{BridgeGateway, Gateway, GatewayConfig};
use overwatch_core::{
    immunize, restart_process, run_forever, scan_scopes, EngineConfig, ScanPacing, ScanReportMode,
    SessionEnd, UpdateChecker, BLOCK_DELAY_SECONDS, DEFAULT_RELEASE_MANIFEST_URL,
    FORCED_UPDATE_EXIT_CODE, STATE_FILE_NAME,
};
use overwatch_denylist::{DenyListClient, DenyListSnapshot, DEFAULT_DENY_LIST_URL};
use overwatch_observability::{
    canonical_logs_dir_from_root, emit_event, init_process_logging, ObservabilityEvent, ProcessKind,
};
use overwatch_types::ReportMode;

const LOG_RETENTION_DAYS: u64 = 14;

#[derive(Parser, Debug)]
#[command(name = "overwatch-engine")]
#[command(about = "Passive anti-scam monitor for group chats", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Monitor group chats and alert when flagged actors act.
    Watch {
        /// Report mode: 1 = log only, 2 = + saved-messages reminder,
        /// 3 = + delivery into the scope itself.
        #[arg(long, env = "OVERWATCH_REPORT_MODE", default_value_t = 1)]
        mode: u8,
        #[arg(long, env = "OVERWATCH_DENY_LIST_URL", default_value = DEFAULT_DENY_LIST_URL)]
        deny_list_url: String,
        #[arg(long, env = "OVERWATCH_RELEASE_URL", default_value = DEFAULT_RELEASE_MANIFEST_URL)]
        release_url: String,
        #[arg(long, env = "OVERWATCH_STATE_DIR")]
        state_dir: Option<PathBuf>,
    },
    /// Sweep scope rosters once and report flagged members.
    Scan {
        /// Case-insensitive scope-title substring; blank scans everything.
        #[arg(long, default_value = "")]
        filter: String,
        /// Report mode: 1 = console only, 2 = + saved messages, 3 = + chat message.
        #[arg(long, env = "OVERWATCH_SCAN_MODE", default_value_t = 1)]
        mode: u8,
        #[arg(long, env = "OVERWATCH_DENY_LIST_URL", default_value = DEFAULT_DENY_LIST_URL)]
        deny_list_url: String,
        #[arg(long, env = "OVERWATCH_STATE_DIR")]
        state_dir: Option<PathBuf>,
    },
    /// Block every flagged actor that still has a usable handle.
    Immunize {
        #[arg(long, env = "OVERWATCH_DENY_LIST_URL", default_value = DEFAULT_DENY_LIST_URL)]
        deny_list_url: String,
        #[arg(long, env = "OVERWATCH_STATE_DIR")]
        state_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Watch {
            mode,
            deny_list_url,
            release_url,
            state_dir,
        } => {
            let mode = parse_report_mode(mode)?;
            let state_dir = resolve_state_dir(state_dir);
            let logs_dir = canonical_logs_dir_from_root(&state_dir);
            let (_log_guard, log_info) =
                init_process_logging(ProcessKind::Engine, &logs_dir, LOG_RETENTION_DAYS)?;
            emit_event(
                tracing::Level::INFO,
                ProcessKind::Engine,
                ObservabilityEvent {
                    event: "logging.initialized",
                    component: "engine.main",
                    scope_id: None,
                    actor_id: None,
                    message_id: None,
                    alert_kind: None,
                    correlation: None,
                    status: Some("ok"),
                    error_code: None,
                    detail: Some("engine jsonl logging initialized"),
                },
            );
            info!("engine logging initialized: {:?}", log_info);

            let version = env!("CARGO_PKG_VERSION");
            log_startup_paths(&state_dir, version);

            // A blocked build must not even connect.
            let checker = UpdateChecker::new(&release_url, version);
            if checker.check_once("startup").await.forced_update_required {
                std::process::exit(FORCED_UPDATE_EXIT_CODE);
            }

            let gateway: Arc<dyn Gateway> =
                Arc::new(BridgeGateway::new(GatewayConfig::from_env()?));
            let shutdown = CancellationToken::new();
            spawn_interrupt_handler(shutdown.clone());

            let config = EngineConfig {
                mode,
                deny_list_url,
                release_manifest_url: release_url,
                state_dir,
                local_version: version.to_string(),
            };
            match run_forever(gateway, config, shutdown).await {
                SessionEnd::RestartRequested => {
                    info!("re-executing the engine binary");
                    let err = restart_process();
                    bail!("process restart failed: {err}");
                }
                end => info!("engine stopped: {end:?}"),
            }
        }
        Command::Scan {
            filter,
            mode,
            deny_list_url,
            state_dir,
        } => {
            let mode = parse_scan_mode(mode)?;
            let state_dir = resolve_state_dir(state_dir);
            let logs_dir = canonical_logs_dir_from_root(&state_dir);
            let (_log_guard, log_info) =
                init_process_logging(ProcessKind::Scan, &logs_dir, LOG_RETENTION_DAYS)?;
            info!("scan logging initialized: {:?}", log_info);
            info!("scan report mode: {}", mode.describe());

            let deny = fetch_deny_list(&deny_list_url).await?;
            let gateway = BridgeGateway::new(GatewayConfig::from_env()?);
            let outcome =
                scan_scopes(&gateway, &deny, &filter, mode, ScanPacing::default()).await?;
            info!(
                "scan finished: {} scope(s) checked, {} skipped, {} flagged actor(s) found",
                outcome.scopes_scanned, outcome.scopes_skipped, outcome.flagged_found
            );
        }
        Command::Immunize {
            deny_list_url,
            state_dir,
        } => {
            let state_dir = resolve_state_dir(state_dir);
            let logs_dir = canonical_logs_dir_from_root(&state_dir);
            let (_log_guard, log_info) =
                init_process_logging(ProcessKind::Immunize, &logs_dir, LOG_RETENTION_DAYS)?;
            info!("immunize logging initialized: {:?}", log_info);

            let deny = fetch_deny_list(&deny_list_url).await?;
            let gateway = BridgeGateway::new(GatewayConfig::from_env()?);
            immunize(&gateway, &deny, Duration::from_secs(BLOCK_DELAY_SECONDS)).await;
        }
    }

    Ok(())
}

fn parse_report_mode(n: u8) -> anyhow::Result<ReportMode> {
    match ReportMode::from_number(n) {
        Some(mode) => Ok(mode),
        None => bail!(
            "invalid report mode `{n}`: expected 1 (log only), \
             2 (+ reminder) or 3 (+ group delivery)"
        ),
    }
}

fn parse_scan_mode(n: u8) -> anyhow::Result<ScanReportMode> {
    match ScanReportMode::from_number(n) {
        Some(mode) => Ok(mode),
        None => bail!(
            "invalid scan mode `{n}`: expected 1 (console only), \
             2 (+ saved messages) or 3 (+ chat message)"
        ),
    }
}

fn resolve_state_dir(flag: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = flag {
        return dir;
    }
    dirs::data_dir()
        .map(|d| d.join("overwatch"))
        .unwrap_or_else(|| PathBuf::from(".overwatch"))
}

async fn fetch_deny_list(url: &str) -> anyhow::Result<DenyListSnapshot> {
    let snapshot = DenyListClient::new(url).fetch().await?;
    if snapshot.is_empty() {
        bail!("deny list at {url} is empty; nothing to do");
    }
    info!("{} flagged actors loaded", snapshot.len());
    Ok(snapshot)
}

fn spawn_interrupt_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, shutting down");
                shutdown.cancel();
            }
            Err(e) => error!("failed to listen for interrupt: {e}"),
        }
    });
}

fn log_startup_paths(state_dir: &Path, version: &str) {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    info!("starting overwatch-engine v{version}");
    info!(
        "startup paths: exe={} state_dir={} state_file={}",
        exe.display(),
        state_dir.display(),
        state_dir.join(STATE_FILE_NAME).display()
    );
}
