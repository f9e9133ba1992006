use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Machine-readable outcome of processing one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeTag {
    UnknownProvider,
    ParsingFailed,
    Ignored,
    Parsed,
    OutOfSequence,
    UnknownCids,
}

impl OutcomeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownProvider => "unknown-provider",
            Self::ParsingFailed => "parsing-failed",
            Self::Ignored => "ignored",
            Self::Parsed => "parsed",
            Self::OutOfSequence => "out-of-sequence",
            Self::UnknownCids => "unknown-cids",
        }
    }

    fn is_success(&self) -> bool {
        matches!(self, Self::Parsed | Self::Ignored)
    }
}

impl fmt::Display for OutcomeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracking context for one notification.
///
/// Tags are append-only and cumulative: a notification can be both `parsed`
/// and `unknown-cids`. Each tag is logged as it is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOutcome {
    pub source: String,
    pub subject: String,
    pub raw_notification_id: Option<Uuid>,
    pub tags: Vec<OutcomeTag>,
}

impl NotificationOutcome {
    pub fn new(source: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            subject: subject.into(),
            raw_notification_id: None,
            tags: Vec::new(),
        }
    }

    /// Record a tag. Repeats of the same tag are logged but stored once.
    pub fn tag(&mut self, tag: OutcomeTag, message: &str) {
        let raw = self
            .raw_notification_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        if tag.is_success() {
            tracing::info!(
                raw_notification = %raw,
                source = %self.source,
                subject = %self.subject,
                tag = tag.as_str(),
                "{message}"
            );
        } else {
            tracing::warn!(
                raw_notification = %raw,
                source = %self.source,
                subject = %self.subject,
                tag = tag.as_str(),
                "{message}"
            );
        }
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    pub fn has(&self, tag: OutcomeTag) -> bool {
        self.tags.contains(&tag)
    }

    /// Everything this notification wrote was rolled back: earlier tags no
    /// longer describe the ledger and there is no raw notification to point at.
    pub fn rolled_back(&mut self, message: &str) {
        self.tags.clear();
        self.tag(OutcomeTag::ParsingFailed, message);
        self.raw_notification_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_accumulate_in_order_without_duplicates() {
        let mut outcome = NotificationOutcome::new("inbox", "Planned work");
        outcome.tag(OutcomeTag::Parsed, "parsed");
        outcome.tag(OutcomeTag::UnknownCids, "circuit CID-9 not found");
        outcome.tag(OutcomeTag::UnknownCids, "circuit CID-10 not found");
        assert_eq!(outcome.tags, vec![OutcomeTag::Parsed, OutcomeTag::UnknownCids]);
        assert!(outcome.has(OutcomeTag::Parsed));
        assert!(!outcome.has(OutcomeTag::Ignored));
    }

    #[test]
    fn rollback_replaces_tags_with_parsing_failed() {
        let mut outcome = NotificationOutcome::new("inbox", "Planned work");
        outcome.raw_notification_id = Some(Uuid::new_v4());
        outcome.tag(OutcomeTag::Parsed, "parsed");
        outcome.tag(OutcomeTag::UnknownCids, "circuit CID-9 not found");
        outcome.rolled_back("processing failed");
        assert_eq!(outcome.tags, vec![OutcomeTag::ParsingFailed]);
        assert_eq!(outcome.raw_notification_id, None);
    }

    #[test]
    fn tags_serialize_as_kebab_case() {
        assert_eq!(
            serde_json::to_value(OutcomeTag::OutOfSequence).unwrap(),
            serde_json::json!("out-of-sequence")
        );
        assert_eq!(OutcomeTag::UnknownProvider.to_string(), "unknown-provider");
    }
}
