//! Notification ingestion: idempotency gate, ledger reconciler, outcome
//! tagging and the engine that drives sources through them.

pub mod engine;
pub mod gate;
pub mod models;
pub mod reconciler;
pub mod tagger;

pub use engine::{IngestEngine, IngestSettings};
pub use models::RunReport;
pub use tagger::{NotificationOutcome, OutcomeTag};
