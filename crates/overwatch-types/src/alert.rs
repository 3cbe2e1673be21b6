use serde::{Deserialize, Serialize};

use crate::scope::ScopeId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A flagged actor authored a message.
    Content,
    /// A flagged actor joined or left a scope.
    Membership,
    /// Outcome of a delayed presence verification.
    Verify,
    /// A flagged actor was invited/added via a service message.
    JoinMessage,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Content => "msg",
            AlertKind::Membership => "join",
            AlertKind::Verify => "verify",
            AlertKind::JoinMessage => "joinmsg",
        }
    }

    pub fn parse(s: &str) -> Option<AlertKind> {
        match s {
            "msg" => Some(AlertKind::Content),
            "join" => Some(AlertKind::Membership),
            "verify" => Some(AlertKind::Verify),
            "joinmsg" => Some(AlertKind::JoinMessage),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of one logical alert for dedup purposes. The correlation part
/// disambiguates otherwise-identical alerts: a source message id, or a
/// fixed literal like "still"/"unknown" for verification outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NotificationKey {
    pub kind: AlertKind,
    pub scope_id: ScopeId,
    pub actor_id: String,
    pub correlation: String,
}

impl NotificationKey {
    pub fn new(
        kind: AlertKind,
        scope_id: ScopeId,
        actor_id: impl Into<String>,
        correlation: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            scope_id,
            actor_id: actor_id.into(),
            correlation: correlation.into(),
        }
    }

    pub fn encode(&self) -> String {
        encode_key_parts(&[
            self.kind.as_str(),
            &self.scope_id.to_string(),
            &self.actor_id,
            &self.correlation,
        ])
    }

    pub fn decode(s: &str) -> Option<NotificationKey> {
        let parts = decode_key_parts(s, 4)?;
        let kind = AlertKind::parse(&parts[0])?;
        let scope_id = parts[1].parse::<ScopeId>().ok()?;
        Some(NotificationKey {
            kind,
            scope_id,
            actor_id: parts[2].clone(),
            correlation: parts[3].clone(),
        })
    }
}

/// Key for the per-(scope, actor) daily in-scope delivery cap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupSendKey {
    pub scope_id: ScopeId,
    pub actor_id: String,
}

impl GroupSendKey {
    pub fn new(scope_id: ScopeId, actor_id: impl Into<String>) -> Self {
        Self {
            scope_id,
            actor_id: actor_id.into(),
        }
    }

    pub fn encode(&self) -> String {
        encode_key_parts(&[&self.scope_id.to_string(), &self.actor_id])
    }

    pub fn decode(s: &str) -> Option<GroupSendKey> {
        let parts = decode_key_parts(s, 2)?;
        let scope_id = parts[0].parse::<ScopeId>().ok()?;
        Some(GroupSendKey {
            scope_id,
            actor_id: parts[1].clone(),
        })
    }
}

/// Composite keys are flattened for JSON persistence by joining parts with
/// `|`; literal pipes inside a part are escaped as `%7C`.
pub fn encode_key_parts(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.replace('|', "%7C"))
        .collect::<Vec<_>>()
        .join("|")
}

pub fn decode_key_parts(s: &str, n_parts: usize) -> Option<Vec<String>> {
    let parts: Vec<&str> = s.split('|').collect();
    if parts.len() != n_parts {
        return None;
    }
    Some(parts.iter().map(|p| p.replace("%7C", "|")).collect())
}

/// Operator-selected delivery channels, chosen once at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    /// Log lines only.
    LogOnly,
    /// Log + deferred private reminder to the operator channel.
    Reminder,
    /// Log + reminder + rate-limited delivery into the originating scope.
    Full,
}

impl ReportMode {
    pub fn from_number(n: u8) -> Option<ReportMode> {
        match n {
            1 => Some(ReportMode::LogOnly),
            2 => Some(ReportMode::Reminder),
            3 => Some(ReportMode::Full),
            _ => None,
        }
    }

    pub fn as_number(&self) -> u8 {
        match self {
            ReportMode::LogOnly => 1,
            ReportMode::Reminder => 2,
            ReportMode::Full => 3,
        }
    }

    pub fn private_reminder(&self) -> bool {
        matches!(self, ReportMode::Reminder | ReportMode::Full)
    }

    pub fn group_delivery(&self) -> bool {
        matches!(self, ReportMode::Full)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ReportMode::LogOnly => "terminal only",
            ReportMode::Reminder => "terminal + saved messages",
            ReportMode::Full => "terminal + saved + group",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── composite key encoding ──

    #[test]
    fn key_roundtrip() {
        let key = NotificationKey::new(AlertKind::Content, -1001234, "555111", "8842");
        let encoded = key.encode();
        assert_eq!(encoded, "msg|-1001234|555111|8842");
        assert_eq!(NotificationKey::decode(&encoded), Some(key));
    }

    #[test]
    fn key_escapes_pipes_inside_parts() {
        let key = NotificationKey::new(AlertKind::Verify, 10, "123456", "a|b");
        let encoded = key.encode();
        assert_eq!(encoded, "verify|10|123456|a%7Cb");
        let back = NotificationKey::decode(&encoded).unwrap();
        assert_eq!(back.correlation, "a|b");
    }

    #[test]
    fn decode_rejects_wrong_arity_and_bad_kind() {
        assert_eq!(NotificationKey::decode("msg|1|2"), None);
        assert_eq!(NotificationKey::decode("bogus|1|2|3"), None);
        assert_eq!(NotificationKey::decode("msg|notanint|2|3"), None);
    }

    #[test]
    fn group_key_roundtrip() {
        let key = GroupSendKey::new(-1009, "777888999");
        let encoded = key.encode();
        assert_eq!(encoded, "-1009|777888999");
        assert_eq!(GroupSendKey::decode(&encoded), Some(key));
        assert_eq!(GroupSendKey::decode("only-one-part"), None);
    }

    // ── alert kinds / report modes ──

    #[test]
    fn alert_kind_names_roundtrip() {
        for kind in [
            AlertKind::Content,
            AlertKind::Membership,
            AlertKind::Verify,
            AlertKind::JoinMessage,
        ] {
            assert_eq!(AlertKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(AlertKind::parse("nope"), None);
    }

    #[test]
    fn report_mode_numbers() {
        assert_eq!(ReportMode::from_number(1), Some(ReportMode::LogOnly));
        assert_eq!(ReportMode::from_number(3), Some(ReportMode::Full));
        assert_eq!(ReportMode::from_number(9), None);
        assert!(!ReportMode::LogOnly.private_reminder());
        assert!(ReportMode::Reminder.private_reminder());
        assert!(!ReportMode::Reminder.group_delivery());
        assert!(ReportMode::Full.group_delivery());
    }
}
