use serde::{Deserialize, Serialize};

/// Base URL of the public tracking forum; a record's `topic_id` points at
/// the thread documenting that actor.
pub const TRACKING_TOPIC_BASE: &str = "https://t.me/scamtrackinglist";

/// One deny-list entry, keyed externally by the actor-id string. Fetched
/// wholesale from the deny-list endpoint and never mutated in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlaggedActor {
    #[serde(default)]
    pub topic_id: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

impl FlaggedActor {
    /// The handle if it is real: trimmed, non-empty, and not one of the
    /// upstream placeholder values ("none", "deleted").
    pub fn usable_handle(&self) -> Option<&str> {
        let h = self.username.as_deref()?.trim();
        if h.is_empty() {
            return None;
        }
        let lower = h.to_lowercase();
        if lower == "none" || lower == "deleted" {
            return None;
        }
        Some(h)
    }

    /// `@handle` when a usable one exists, else the full name, else "Unknown".
    pub fn display_name(&self) -> String {
        if let Some(h) = self.usable_handle() {
            return if h.starts_with('@') {
                h.to_string()
            } else {
                format!("@{h}")
            };
        }
        let full = self.full_name.as_deref().unwrap_or("").trim();
        if full.is_empty() {
            "Unknown".to_string()
        } else {
            full.to_string()
        }
    }

    pub fn topic_link(&self) -> Option<String> {
        let tid = self.topic_id?;
        Some(format!("{TRACKING_TOPIC_BASE}/{tid}"))
    }
}
