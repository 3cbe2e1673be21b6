use serde::{Deserialize, Serialize};

/// Platform chat identifier. Group scopes carry the platform's `-100`
/// prefix in their raw form.
pub type ScopeId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Group,
    Broadcast,
    Direct,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeInfo {
    pub id: ScopeId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub handle: Option<String>,
    pub kind: ScopeKind,
    #[serde(default)]
    pub participant_count: Option<i64>,
}

impl ScopeInfo {
    pub fn title_or_unknown(&self) -> &str {
        self.title.as_deref().unwrap_or("(unknown chat)")
    }

    pub fn link(&self) -> String {
        scope_link(self.id, self.handle.as_deref())
    }

    pub fn message_link(&self, message_id: i64) -> String {
        message_link(self.id, self.handle.as_deref(), message_id)
    }
}

/// Strips the `-100` channel prefix (or a bare minus) so the id can be used
/// in private `t.me/c/<id>` links and shared-scope comparisons.
pub fn internal_scope_id(scope_id: ScopeId) -> String {
    let s = scope_id.to_string();
    if let Some(rest) = s.strip_prefix("-100") {
        return rest.to_string();
    }
    if scope_id < 0 {
        return (-scope_id).to_string();
    }
    s
}

pub fn scope_link(scope_id: ScopeId, handle: Option<&str>) -> String {
    match handle {
        Some(h) if !h.is_empty() => format!("https://t.me/{h}"),
        _ => format!("https://t.me/c/{}", internal_scope_id(scope_id)),
    }
}

pub fn message_link(scope_id: ScopeId, handle: Option<&str>, message_id: i64) -> String {
    match handle {
        Some(h) if !h.is_empty() => format!("https://t.me/{h}/{message_id}"),
        _ => format!(
            "https://t.me/c/{}/{message_id}",
            internal_scope_id(scope_id)
        ),
    }
}
