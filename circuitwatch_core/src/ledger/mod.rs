//! Durable maintenance ledger: provider/circuit inventory plus the records
//! produced by notification ingestion.

pub mod models;
pub mod sqlite;

pub use sqlite::LedgerStore;
