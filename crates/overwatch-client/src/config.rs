//! Gateway connection configuration.
//!
//! The engine does not hold platform credentials itself; an authenticated
//! userbot bridge sidecar does, and `OVERWATCH_BRIDGE_URL` points at it.
//! `GatewayConfig::from_env()` reads the `OVERWATCH_*` env vars and returns
//! `Err` when no bridge is configured.

use anyhow::bail;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the bridge, e.g. `http://127.0.0.1:8484`.
    pub base_url: String,
    /// Value of `OVERWATCH_BRIDGE_TOKEN`, sent as `Authorization: Bearer <token>`.
    pub token: Option<String>,
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: normalize_base_url(base_url.into()),
            token,
        }
    }

    /// Build from environment variables. Returns `Err` if no bridge URL is set.
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = match std::env::var("OVERWATCH_BRIDGE_URL") {
            Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => bail!(
                "no gateway configured: set OVERWATCH_BRIDGE_URL to the \
                 userbot bridge base URL (e.g. http://127.0.0.1:8484)"
            ),
        };

        let token = std::env::var("OVERWATCH_BRIDGE_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(Self::new(base_url, token))
    }
}

fn normalize_base_url(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}
