use super::models::{Maintenance, NotificationPayload};
use std::error::Error as StdError;
use std::sync::Arc;

/// Recoverable failure raised while parsing one notification.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    /// The payload did not have the structure the parser expects.
    #[error("structural parsing error: {0}")]
    Structural(String),

    /// None of the supplied payload parts is one the parser understands.
    #[error("no payload with a supported content type (expected one of {expected:?})")]
    NoSupportedPayload { expected: Vec<String> },

    #[error("parser failure: {0}")]
    Other(#[source] Box<dyn StdError + Send + Sync + 'static>),
}

impl ParseError {
    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural(message.into())
    }
}

/// Turns the payload parts of one notification into zero or more maintenances.
pub trait MaintenanceParser: Send + Sync {
    fn parse(
        &self,
        provider_type: &str,
        payloads: &[NotificationPayload],
    ) -> Result<Vec<Maintenance>, ParseError>;
}

/// Resolves parsers and accepted payload content types per provider type.
pub trait ParserRegistry: Send + Sync {
    /// Content types a provider's notifications are parsed from, in preference order.
    fn content_types(&self, provider_type: &str) -> Option<Vec<String>>;

    /// `None` when no parser is mapped to the provider type.
    fn init_parser(&self, provider_type: &str) -> Option<Arc<dyn MaintenanceParser>>;
}
