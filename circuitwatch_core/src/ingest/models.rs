use super::tagger::{NotificationOutcome, OutcomeTag};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Raw notifications created by the run, in processing order.
    pub raw_notification_ids: Vec<Uuid>,
    pub outcomes: Vec<NotificationOutcome>,
}

impl RunReport {
    pub fn record(&mut self, outcome: NotificationOutcome) {
        if let Some(id) = outcome.raw_notification_id {
            if !self.raw_notification_ids.contains(&id) {
                self.raw_notification_ids.push(id);
            }
        }
        self.outcomes.push(outcome);
    }

    /// Number of processed notifications carrying `tag`.
    pub fn count(&self, tag: OutcomeTag) -> usize {
        self.outcomes.iter().filter(|o| o.has(tag)).count()
    }
}
