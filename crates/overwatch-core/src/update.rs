//! Release manifest checks.
//!
//! The upstream deny-list operators publish a small JSON manifest naming
//! the current release and whether older builds are blocked. The engine
//! checks it at startup and every two hours, printing the verdict every
//! cycle. A forced newer release stops the process with a dedicated exit
//! code so supervisors can tell "please update" apart from a crash.

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const DEFAULT_RELEASE_MANIFEST_URL: &str =
    "https://countersign.chat/api/overwatch_release.json";
pub const UPDATE_CHECK_SECONDS: u64 = 2 * 60 * 60;
pub const FORCED_UPDATE_EXIT_CODE: i32 = 3;

const FETCH_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseManifest {
    pub version: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateStatus {
    pub local_version: String,
    pub remote_version: Option<String>,
    pub remote_force: Option<bool>,
    pub update_available: bool,
    pub forced_update_required: bool,
    pub error: Option<String>,
}

/// Semver-ish: "0.3.0" becomes (0, 3, 0). Accepts a leading "v"; runs of
/// non-digits separate the parts; missing parts default to 0.
pub fn parse_version(v: &str) -> (u64, u64, u64) {
    let v = v.trim();
    let v = v.strip_prefix(['v', 'V']).unwrap_or(v);
    let mut nums = v
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse::<u64>().ok());
    (
        nums.next().unwrap_or(0),
        nums.next().unwrap_or(0),
        nums.next().unwrap_or(0),
    )
}

pub fn is_remote_newer(remote: &str, local: &str) -> bool {
    parse_version(remote) > parse_version(local)
}

pub struct UpdateChecker {
    url: String,
    local_version: String,
    client: reqwest::Client,
}

impl UpdateChecker {
    pub fn new(url: impl Into<String>, local_version: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            local_version: local_version.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
                .build()
                .expect("reqwest client"),
        }
    }

    /// Compares a fetched manifest against the local version.
    pub fn evaluate(&self, manifest: &ReleaseManifest) -> UpdateStatus {
        let update_available = is_remote_newer(&manifest.version, &self.local_version);
        UpdateStatus {
            local_version: self.local_version.clone(),
            remote_version: Some(manifest.version.clone()),
            remote_force: Some(manifest.force),
            update_available,
            forced_update_required: update_available && manifest.force,
            error: None,
        }
    }

    /// One fetch-and-compare cycle. Logs the verdict every time, whatever
    /// it is; silence would be indistinguishable from a dead task.
    pub async fn check_once(&self, label: &str) -> UpdateStatus {
        let failed = |error: &str| UpdateStatus {
            local_version: self.local_version.clone(),
            error: Some(error.to_string()),
            ..Default::default()
        };

        // cache buster: some CDN layers ignore Cache-Control on their own
        let url = format!("{}?{}", self.url, Utc::now().timestamp());
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, "Overwatch")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await;
        let body = match response {
            Ok(r) if r.status().is_success() => match r.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!("update check ({label}): unable to read manifest body: {e}");
                    return failed("fetch_failed");
                }
            },
            Ok(r) => {
                warn!(
                    "update check ({label}): manifest fetch returned {} ({})",
                    r.status(),
                    self.url
                );
                return failed("fetch_failed");
            }
            Err(e) => {
                warn!(
                    "update check ({label}): unable to fetch manifest ({}): {e}",
                    self.url
                );
                return failed("fetch_failed");
            }
        };

        let manifest: ReleaseManifest = match serde_json::from_str(&body) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("update check ({label}): fetched manifest but could not parse it: {e}");
                return failed("parse_failed");
            }
        };

        let status = self.evaluate(&manifest);
        if status.update_available {
            let force_note = if status.forced_update_required {
                " (FORCED)"
            } else {
                ""
            };
            info!(
                "update check ({label}): update available{force_note}: local={} remote={} force={}",
                status.local_version, manifest.version, manifest.force
            );
        } else {
            info!(
                "update check ({label}): up to date: local={} remote={} force={}",
                status.local_version, manifest.version, manifest.force
            );
        }

        if status.forced_update_required {
            error!(
                "this build is blocked upstream: local={} required={} update from {}",
                status.local_version, manifest.version, self.url
            );
        }
        status
    }
}

/// Runs an immediate check, then one per interval until cancelled. A
/// forced block stops the whole process.
pub async fn check_updates_periodically(
    checker: UpdateChecker,
    cancel: CancellationToken,
    interval: Duration,
) {
    let status = checker.check_once("periodic").await;
    if status.forced_update_required {
        std::process::exit(FORCED_UPDATE_EXIT_CODE);
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        let status = checker.check_once("periodic").await;
        if status.forced_update_required {
            std::process::exit(FORCED_UPDATE_EXIT_CODE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── version parsing ──

    #[test]
    fn versions_parse_loosely() {
        assert_eq!(parse_version("0.3.6"), (0, 3, 6));
        assert_eq!(parse_version("v1.2.3"), (1, 2, 3));
        assert_eq!(parse_version("2.0"), (2, 0, 0));
        assert_eq!(parse_version("1.2.3-beta"), (1, 2, 3));
        assert_eq!(parse_version(""), (0, 0, 0));
        assert_eq!(parse_version("garbage"), (0, 0, 0));
    }

    #[test]
    fn remote_newer_comparison() {
        assert!(is_remote_newer("0.4.0", "0.3.6"));
        assert!(is_remote_newer("1.0.0", "0.9.9"));
        assert!(!is_remote_newer("0.3.6", "0.3.6"));
        assert!(!is_remote_newer("0.3.5", "0.3.6"));
        assert!(is_remote_newer("0.3.10", "0.3.9"));
    }

    // ── evaluation ──

    #[test]
    fn forced_flag_only_matters_when_newer() {
        let checker = UpdateChecker::new("http://localhost/manifest.json", "0.3.6");

        let newer_forced = ReleaseManifest {
            version: "0.4.0".to_string(),
            force: true,
        };
        let status = checker.evaluate(&newer_forced);
        assert!(status.update_available);
        assert!(status.forced_update_required);

        let same_forced = ReleaseManifest {
            version: "0.3.6".to_string(),
            force: true,
        };
        let status = checker.evaluate(&same_forced);
        assert!(!status.update_available);
        assert!(!status.forced_update_required);

        let newer_soft = ReleaseManifest {
            version: "0.4.0".to_string(),
            force: false,
        };
        let status = checker.evaluate(&newer_soft);
        assert!(status.update_available);
        assert!(!status.forced_update_required);
    }

    #[test]
    fn manifest_parses_with_and_without_force() {
        let m: ReleaseManifest = serde_json::from_str(r#"{"version":"0.4.0","force":true}"#).unwrap();
        assert!(m.force);
        let m: ReleaseManifest = serde_json::from_str(r#"{"version":"0.4.0"}"#).unwrap();
        assert!(!m.force);
        assert!(serde_json::from_str::<ReleaseManifest>(r#"{"force":true}"#).is_err());
    }

    #[tokio::test]
    async fn unreachable_manifest_reports_fetch_failure() {
        // discard port on loopback, refused immediately
        let checker = UpdateChecker::new("http://127.0.0.1:9/manifest.json", "0.3.6");
        let status = checker.check_once("test").await;
        assert_eq!(status.error.as_deref(), Some("fetch_failed"));
        assert!(!status.forced_update_required);
    }
}
