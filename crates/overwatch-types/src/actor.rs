use serde::{Deserialize, Serialize};

/// Last-seen visibility as reported by the platform. `LongTimeAgo` is the
/// value shown for accounts that blocked the viewer or hide their status
/// entirely, which makes shared-scope lookups unreliable for them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Recently,
    LastWeek,
    LastMonth,
    LongTimeAgo,
    #[serde(other)]
    Unknown,
}

impl PresenceStatus {
    pub fn is_hidden(&self) -> bool {
        matches!(self, PresenceStatus::LongTimeAgo)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorProfile {
    pub id: String,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default = "default_status")]
    pub status: PresenceStatus,
}

fn default_status() -> PresenceStatus {
    PresenceStatus::Unknown
}

impl ActorProfile {
    /// `@handle` when one exists, else the concatenated name, else "Unknown".
    pub fn display_name(&self) -> String {
        if let Some(h) = self.handle.as_deref() {
            if !h.is_empty() {
                return format!("@{h}");
            }
        }
        let full = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        let full = full.trim();
        if full.is_empty() {
            "Unknown".to_string()
        } else {
            full.to_string()
        }
    }
}
