//! Parser adapter contract.
//!
//! Provider-specific grammars live outside the core; the pipeline only sees a
//! `ParserRegistry` that maps a provider type to the payload content types it
//! accepts and to a `MaintenanceParser` producing structured `Maintenance`
//! events.

pub mod models;
pub mod traits;

pub use models::{CircuitEntry, Maintenance, NotificationPayload, StatusUpdate};
pub use traits::{MaintenanceParser, ParseError, ParserRegistry};
