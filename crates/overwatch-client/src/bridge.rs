//! HTTP client for the userbot bridge.
//!
//! The bridge sidecar owns the authenticated platform session and exposes it
//! as plain JSON over HTTP: a long-poll event feed (`/v1/events` with
//! `timeout=25`) plus one endpoint per outbound operation. Rate limits come
//! back as HTTP 429 with the mandated cooldown and are surfaced as the typed
//! [`GatewayError::FloodWait`] so call sites can wait it out.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use overwatch_types::{ActorProfile, GatewayEvent, ScopeId, ScopeInfo, SendTarget, SentMessage};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::gateway::Gateway;

const OP_TIMEOUT_SECS: u64 = 35;
const POLL_TIMEOUT_SECS: u64 = 25;
const POLL_RETRY_DELAY_SECS: u64 = 2;
/// Consecutive poll failures before the feed counts as disconnected and the
/// supervisory loop takes over.
const MAX_POLL_FAILURES: u32 = 5;
/// Cooldown assumed when a 429 arrives without an explicit duration.
const DEFAULT_FLOOD_WAIT_SECS: u64 = 30;

pub struct BridgeGateway {
    base_url: String,
    token: Option<String>,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    events: Vec<GatewayEvent>,
    next_offset: i64,
}

#[derive(Debug, Deserialize)]
struct FloodBody {
    retry_after_seconds: Option<u64>,
}

impl BridgeGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            base_url: config.base_url,
            token: config.token,
            client: Client::builder()
                .timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                .build()
                .expect("failed to create reqwest client"),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.authed(self.client.get(self.url(path))).send().await?;
        Self::expect_success(resp).await?.json::<T>().await.map_err(Into::into)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let resp = self
            .authed(self.client.post(self.url(path)))
            .json(body)
            .send()
            .await?;
        Self::expect_success(resp).await?.json::<T>().await.map_err(Into::into)
    }

    async fn post_ok(&self, path: &str, body: &serde_json::Value) -> Result<()> {
        let resp = self
            .authed(self.client.post(self.url(path)))
            .json(body)
            .send()
            .await?;
        Self::expect_success(resp).await?;
        Ok(())
    }

    async fn expect_success(resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = resp.text().await.unwrap_or_default();
        Err(classify_error(status, retry_after, &body))
    }
}

/// Maps a non-success bridge response onto the typed error surface.
fn classify_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> GatewayError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let secs = serde_json::from_str::<FloodBody>(body)
            .ok()
            .and_then(|b| b.retry_after_seconds)
            .or(retry_after)
            .unwrap_or(DEFAULT_FLOOD_WAIT_SECS);
        return GatewayError::FloodWait(Duration::from_secs(secs));
    }
    if status == StatusCode::NOT_FOUND {
        return GatewayError::NotFound(preview(body));
    }
    if status == StatusCode::NOT_IMPLEMENTED {
        return GatewayError::Unsupported(preview(body));
    }
    GatewayError::Other(format!("bridge returned {status}: {}", preview(body)))
}

fn preview(body: &str) -> String {
    if body.chars().count() > 320 {
        let truncated: String = body.chars().take(320).collect();
        format!("{truncated}...")
    } else {
        body.to_string()
    }
}

#[async_trait]
impl Gateway for BridgeGateway {
    async fn me(&self) -> Result<ActorProfile> {
        self.get_json("/v1/me").await
    }

    async fn listen(&self, tx: mpsc::Sender<GatewayEvent>) -> Result<()> {
        let mut offset: i64 = 0;
        let mut failures: u32 = 0;
        loop {
            let resp = self
                .authed(self.client.get(self.url("/v1/events")))
                .query(&[
                    ("offset", offset.to_string()),
                    ("timeout", POLL_TIMEOUT_SECS.to_string()),
                ])
                .send()
                .await;

            let page: EventsPage = match async {
                Self::expect_success(resp?).await?
                    .json::<EventsPage>()
                    .await
                    .map_err(GatewayError::from)
            }
            .await
            {
                Ok(page) => page,
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_POLL_FAILURES {
                        return Err(GatewayError::Other(format!(
                            "event feed unreachable after {failures} attempts: {e}"
                        )));
                    }
                    warn!("bridge poll error ({failures}/{MAX_POLL_FAILURES}): {e}");
                    tokio::time::sleep(Duration::from_secs(POLL_RETRY_DELAY_SECS)).await;
                    continue;
                }
            };

            failures = 0;
            offset = page.next_offset;
            if page.events.is_empty() {
                debug!("bridge poll: no events");
            }
            for event in page.events {
                if tx.send(event).await.is_err() {
                    return Ok(()); // receiver dropped, shutdown
                }
            }
        }
    }

    async fn send_message(
        &self,
        target: SendTarget,
        text: &str,
        schedule_in: Option<Duration>,
    ) -> Result<SentMessage> {
        let body = serde_json::json!({
            "target": target,
            "text": text,
            "schedule_in": schedule_in.map(|d| d.as_secs()),
        });
        self.post_json("/v1/messages/send", &body).await
    }

    async fn delete_messages(
        &self,
        scope_id: ScopeId,
        message_ids: &[i64],
        revoke: bool,
    ) -> Result<()> {
        let body = serde_json::json!({
            "scope_id": scope_id,
            "message_ids": message_ids,
            "revoke": revoke,
        });
        self.post_ok("/v1/messages/delete", &body).await
    }

    async fn resolve_actor(&self, actor_id: &str) -> Result<ActorProfile> {
        self.get_json(&format!("/v1/actors/{actor_id}")).await
    }

    async fn resolve_handle(&self, handle: &str) -> Result<ActorProfile> {
        let handle = handle.trim_start_matches('@');
        self.get_json(&format!("/v1/actors/by-handle/{handle}")).await
    }

    async fn list_scopes(&self) -> Result<Vec<ScopeInfo>> {
        self.get_json("/v1/scopes").await
    }

    async fn scope_info(&self, scope_id: ScopeId) -> Result<ScopeInfo> {
        self.get_json(&format!("/v1/scopes/{scope_id}")).await
    }

    async fn participants(&self, scope_id: ScopeId) -> Result<Vec<ActorProfile>> {
        self.get_json(&format!("/v1/scopes/{scope_id}/participants")).await
    }

    async fn recent_participants(
        &self,
        scope_id: ScopeId,
        limit: usize,
    ) -> Result<Vec<ActorProfile>> {
        self.get_json(&format!(
            "/v1/scopes/{scope_id}/participants?recent=true&limit={limit}"
        ))
        .await
    }

    async fn common_scopes(&self, actor_id: &str) -> Result<Vec<ScopeId>> {
        self.get_json(&format!("/v1/actors/{actor_id}/common-scopes")).await
    }

    async fn block_actor(&self, handle: &str) -> Result<()> {
        let body = serde_json::json!({ "handle": handle });
        self.post_ok("/v1/actors/block", &body).await
    }
}
