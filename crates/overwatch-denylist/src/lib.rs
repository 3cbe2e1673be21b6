//! Deny-list repository client.
//!
//! The deny-list endpoint returns `{ "data": { "<actor_id>": { topic_id,
//! reason, username, full_name } } }`. Each fetch produces a complete
//! [`DenyListSnapshot`] that replaces the previous one wholesale; there is
//! no partial merge. Non-conforming payloads and malformed entries are
//! tolerated (skipped or reported as errors the caller ignores in favor of
//! the previous snapshot); a bad fetch must never take the engine down.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::bail;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};

use overwatch_types::FlaggedActor;

pub const DEFAULT_DENY_LIST_URL: &str = "https://countersign.chat/api/scammer_ids_v2.json";

const FETCH_TIMEOUT_SECS: u64 = 30;

/// One complete deny-list generation. The key set doubles as the flagged
/// actor-id set; lookups are by actor-id string.
#[derive(Debug, Clone, Default)]
pub struct DenyListSnapshot {
    records: HashMap<String, FlaggedActor>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl DenyListSnapshot {
    pub fn new(records: HashMap<String, FlaggedActor>) -> Self {
        Self {
            records,
            fetched_at: Some(Utc::now()),
        }
    }

    pub fn contains(&self, actor_id: &str) -> bool {
        self.records.contains_key(actor_id)
    }

    pub fn get(&self, actor_id: &str) -> Option<&FlaggedActor> {
        self.records.get(actor_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &HashMap<String, FlaggedActor> {
        &self.records
    }
}

pub struct DenyListClient {
    url: String,
    client: Client,
}

impl DenyListClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::builder()
                .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
                .build()
                .expect("failed to create reqwest client"),
        }
    }

    /// Fetches a fresh snapshot. Errors (network, HTTP, shape mismatch) are
    /// equivalent to an empty result from the caller's point of view: keep
    /// the previous snapshot and log.
    pub async fn fetch(&self) -> anyhow::Result<DenyListSnapshot> {
        debug!("fetching deny-list from {}", self.url);
        let payload: Value = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        snapshot_from_payload(&payload)
    }
}

/// Parses the `{ data: { id: record } }` envelope. Entries that are not
/// objects are skipped; a missing or non-object `data` field is an error.
pub fn snapshot_from_payload(payload: &Value) -> anyhow::Result<DenyListSnapshot> {
    let Some(data) = payload.get("data").and_then(|d| d.as_object()) else {
        bail!("deny-list response format issue: expected {{ data: {{...}} }}");
    };

    let mut records = HashMap::new();
    for (actor_id, value) in data {
        let Some(record) = record_from_value(value) else {
            debug!("skipping malformed deny-list entry for {actor_id}");
            continue;
        };
        records.insert(actor_id.clone(), record);
    }

    let count = payload
        .get("count")
        .and_then(|c| c.as_u64())
        .unwrap_or(records.len() as u64);
    match payload.get("generated_at").and_then(|g| g.as_str()) {
        Some(generated_at) => info!("loaded {count} flagged actors (generated_at={generated_at})"),
        None => info!("loaded {count} flagged actors"),
    }

    Ok(DenyListSnapshot::new(records))
}

fn record_from_value(value: &Value) -> Option<FlaggedActor> {
    let obj = value.as_object()?;
    Some(FlaggedActor {
        topic_id: lenient_i64(obj.get("topic_id")),
        reason: string_field(obj.get("reason")),
        username: string_field(obj.get("username")),
        full_name: string_field(obj.get("full_name")),
    })
}

// Upstream serves topic ids as either numbers or digit strings.
fn lenient_i64(value: Option<&Value>) -> Option<i64> {
    let value = value?;
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    value.as_str()?.trim().parse().ok()
}

fn string_field(value: Option<&Value>) -> Option<String> {
    value.and_then(|v| v.as_str()).map(|s| s.to_string())
}
