//! Circuitwatch core library: the maintenance ledger, the notification
//! ingestion pipeline, and the traits sources and parsers plug into.

pub mod config;
pub mod error;
pub mod ingest;
pub mod ledger;
pub mod o11y;
pub mod parser;
pub mod source;

pub use config::{SourceKind, SourceSettings, WatchConfig};
pub use error::{Error, Result};
pub use ingest::{IngestEngine, IngestSettings, NotificationOutcome, OutcomeTag, RunReport};
pub use ledger::LedgerStore;
pub use ledger::models::{
    Circuit, CircuitImpact, CircuitMaintenance, Impact, MaintenanceStatus, Note, ParsedNotification,
    Provider, RawNotification,
};
pub use parser::{
    CircuitEntry, Maintenance, MaintenanceParser, NotificationPayload, ParseError, ParserRegistry,
    StatusUpdate,
};
pub use source::{MaintenanceNotification, NotificationSource, SenderDirectory};
