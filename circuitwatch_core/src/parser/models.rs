use crate::ledger::models::{Impact, MaintenanceStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel some providers use to say "keep whatever status is recorded".
pub const NO_CHANGE: &str = "NO-CHANGE";

/// One extracted part of a notification, tagged with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub content_type: String,
    #[serde(with = "lossy_text")]
    pub body: Vec<u8>,
}

impl NotificationPayload {
    pub fn new(content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.into().to_ascii_lowercase(),
            body: body.into(),
        }
    }

    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

mod lossy_text {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&String::from_utf8_lossy(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        Ok(String::deserialize(d)?.into_bytes())
    }
}

/// Status reported by a parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StatusUpdate {
    /// Provider explicitly signalled no status change.
    Unchanged,
    Known(MaintenanceStatus),
    /// A status string outside the recognized vocabulary.
    Unknown(String),
}

impl StatusUpdate {
    pub fn from_raw(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case(NO_CHANGE) {
            return Self::Unchanged;
        }
        match raw.parse::<MaintenanceStatus>() {
            Ok(status) => Self::Known(status),
            Err(_) => Self::Unknown(raw.to_string()),
        }
    }

    /// Status to record on a freshly created maintenance.
    pub fn initial(&self) -> MaintenanceStatus {
        match self {
            Self::Known(status) => *status,
            Self::Unchanged | Self::Unknown(_) => MaintenanceStatus::Unknown,
        }
    }

    /// Status to write on update, `None` when the recorded one must be kept.
    pub fn overwrite(&self) -> Option<MaintenanceStatus> {
        match self {
            Self::Unchanged => None,
            other => Some(other.initial()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitEntry {
    pub circuit_id: String,
    #[serde(default)]
    pub impact: Impact,
}

impl CircuitEntry {
    pub fn new(circuit_id: impl Into<String>, impact: Impact) -> Self {
        Self {
            circuit_id: circuit_id.into(),
            impact,
        }
    }

    /// Key used to compare circuit sets across updates.
    pub fn normalized_id(&self) -> String {
        self.circuit_id.trim().to_lowercase()
    }
}

/// A structured maintenance event produced by a parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maintenance {
    pub maintenance_id: String,
    pub provider: String,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub sequence: i64,
    #[serde(default)]
    pub organizer: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub summary: String,
    pub status: StatusUpdate,
    pub stamp: DateTime<Utc>,
    #[serde(default)]
    pub circuits: Vec<CircuitEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_update_models_sentinel_and_fallback() {
        assert_eq!(StatusUpdate::from_raw("no-change"), StatusUpdate::Unchanged);
        assert_eq!(
            StatusUpdate::from_raw("CONFIRMED"),
            StatusUpdate::Known(MaintenanceStatus::Confirmed)
        );
        let odd = StatusUpdate::from_raw("POSTPONED");
        assert_eq!(odd, StatusUpdate::Unknown("POSTPONED".to_string()));
        assert_eq!(odd.initial(), MaintenanceStatus::Unknown);
        assert_eq!(odd.overwrite(), Some(MaintenanceStatus::Unknown));
        assert_eq!(StatusUpdate::Unchanged.overwrite(), None);
        assert_eq!(StatusUpdate::Unchanged.initial(), MaintenanceStatus::Unknown);
    }

    #[test]
    fn circuit_ids_normalize_for_diffing() {
        let e = CircuitEntry::new("  CID-AbC ", Impact::Degraded);
        assert_eq!(e.normalized_id(), "cid-abc");
    }
}
