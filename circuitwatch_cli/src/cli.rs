use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "circuitwatch",
    version,
    about = "Ingest provider maintenance notifications into the circuit ledger"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fetch notifications from every configured source and reconcile them (default).
    Run {
        /// Process and report, then roll every change back.
        #[arg(long)]
        dry_run: bool,

        /// Fetch messages received after this RFC 3339 instant instead of the watermark.
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Only run the named source(s).
        #[arg(long = "source")]
        sources: Vec<String>,
    },

    /// Check credentials of configured sources.
    TestAuth {
        /// Only test the named source(s).
        #[arg(long = "source")]
        sources: Vec<String>,
    },

    /// Load providers and circuits from a JSON inventory file.
    ImportInventory {
        path: PathBuf,
    },

    /// Create the ledger database schema.
    Migrate,

    /// Print current configuration (redacted secrets).
    Config,
}
