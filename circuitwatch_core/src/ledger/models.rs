use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Upper bound (in chars) for `CircuitMaintenance.name`.
pub const MAX_MAINTENANCE_NAME_LENGTH: usize = 100;
pub const MAX_NOTIFICATION_SUBJECT_LENGTH: usize = 255;
pub const MAX_NOTIFICATION_SENDER_LENGTH: usize = 255;

/// Truncate to at most `max` chars without splitting a code point.
pub fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

/// Deterministic ledger key for a provider's maintenance: `{provider}-{maintenance_id}`.
pub fn maintenance_name(provider: &str, maintenance_id: &str) -> String {
    truncate_chars(
        &format!("{provider}-{maintenance_id}"),
        MAX_MAINTENANCE_NAME_LENGTH,
    )
}

/// Recognized maintenance lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum MaintenanceStatus {
    Tentative,
    Confirmed,
    Cancelled,
    InProcess,
    Completed,
    ReScheduled,
    Unknown,
}

impl MaintenanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tentative => "TENTATIVE",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::InProcess => "IN-PROCESS",
            Self::Completed => "COMPLETED",
            Self::ReScheduled => "RE-SCHEDULED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl FromStr for MaintenanceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TENTATIVE" => Ok(Self::Tentative),
            "CONFIRMED" => Ok(Self::Confirmed),
            "CANCELLED" => Ok(Self::Cancelled),
            "IN-PROCESS" => Ok(Self::InProcess),
            "COMPLETED" => Ok(Self::Completed),
            "RE-SCHEDULED" => Ok(Self::ReScheduled),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(Error::InvalidInput(format!(
                "unknown maintenance status '{other}'"
            ))),
        }
    }
}

/// Severity with which a circuit is affected by a maintenance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Impact {
    NoImpact,
    ReducedRedundancy,
    Degraded,
    #[default]
    Outage,
}

impl Impact {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoImpact => "NO-IMPACT",
            Self::ReducedRedundancy => "REDUCED-REDUNDANCY",
            Self::Degraded => "DEGRADED",
            Self::Outage => "OUTAGE",
        }
    }
}

impl FromStr for Impact {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NO-IMPACT" => Ok(Self::NoImpact),
            "REDUCED-REDUNDANCY" => Ok(Self::ReducedRedundancy),
            "DEGRADED" => Ok(Self::Degraded),
            "OUTAGE" => Ok(Self::Outage),
            other => Err(Error::InvalidInput(format!("unknown impact '{other}'"))),
        }
    }
}

/// A carrier issuing maintenance notifications.
///
/// `notification_emails` is the allow-list of sender addresses, stored as a
/// comma-separated list and matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub notification_emails: Vec<String>,
    /// Overrides the slug when resolving a parser.
    #[serde(default)]
    pub parser_type: Option<String>,
}

impl Provider {
    pub fn new(
        slug: impl Into<String>,
        name: impl Into<String>,
        notification_emails: &str,
    ) -> Result<Self> {
        let slug = slug.into();
        if slug.trim().is_empty() {
            return Err(Error::InvalidInput("provider slug is empty".to_string()));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            slug,
            name: name.into(),
            notification_emails: split_emails(notification_emails),
            parser_type: None,
        })
    }

    pub fn with_parser_type(mut self, parser_type: impl Into<String>) -> Self {
        self.parser_type = Some(parser_type.into());
        self
    }

    /// Identifier handed to the parser registry.
    pub fn provider_type(&self) -> &str {
        self.parser_type.as_deref().unwrap_or(&self.slug)
    }

    pub fn joined_emails(&self) -> String {
        self.notification_emails.join(",")
    }
}

/// Parse a comma-separated email allow-list into normalized entries.
pub fn split_emails(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

/// A provider circuit known to the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circuit {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub cid: String,
}

/// A received notification, persisted once per (subject, provider, stamp).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub id: Uuid,
    pub subject: String,
    pub sender: String,
    pub provider_id: Uuid,
    pub source: String,
    pub stamp: DateTime<Utc>,
    pub raw: Vec<u8>,
    pub parsed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitMaintenance {
    pub id: Uuid,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub description: String,
    pub status: MaintenanceStatus,
    pub ack: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitImpact {
    pub id: Uuid,
    pub maintenance_id: Uuid,
    pub circuit_id: Uuid,
    pub impact: Impact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteLevel {
    Info,
    Warning,
}

impl NoteLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "warning" => Self::Warning,
            _ => Self::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub maintenance_id: Uuid,
    pub title: String,
    pub level: NoteLevel,
    pub comment: String,
}

impl Note {
    /// Note recorded when a parsed circuit id does not resolve to inventory.
    pub fn unresolved_circuit(maintenance_id: Uuid, cid: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            maintenance_id,
            title: truncate_chars(&format!("Nonexistent circuit ID {cid}"), 200),
            level: NoteLevel::Warning,
            comment: format!("Circuit ID {cid} referenced was not found in the database"),
        }
    }
}

/// Append-only audit record linking a raw notification to the maintenance it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedNotification {
    pub id: Uuid,
    pub maintenance_id: Uuid,
    pub raw_notification_id: Uuid,
    pub json: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn maintenance_name_is_capped() {
        let long_id = "x".repeat(300);
        let name = maintenance_name("ntt", &long_id);
        assert_eq!(name.chars().count(), MAX_MAINTENANCE_NAME_LENGTH);
        assert!(name.starts_with("ntt-xxx"));
        assert_eq!(name, maintenance_name("ntt", &long_id));
    }

    #[test]
    fn provider_normalizes_sender_allow_list() {
        let p = Provider::new("ntt", "NTT", " NOC@ntt.net , maint@ntt.net,").unwrap();
        assert_eq!(p.notification_emails, vec!["noc@ntt.net", "maint@ntt.net"]);
        assert_eq!(p.provider_type(), "ntt");
        assert_eq!(p.with_parser_type("bcop").provider_type(), "bcop");
    }

    #[test]
    fn status_vocabulary_round_trips_through_strings() {
        for s in [
            MaintenanceStatus::Tentative,
            MaintenanceStatus::InProcess,
            MaintenanceStatus::ReScheduled,
        ] {
            assert_eq!(s.as_str().parse::<MaintenanceStatus>().unwrap(), s);
        }
        assert!("SOMETHING".parse::<MaintenanceStatus>().is_err());
        assert_eq!(
            serde_json::to_value(MaintenanceStatus::InProcess).unwrap(),
            serde_json::json!("IN-PROCESS")
        );
    }
}
