//! Tracing bootstrap.
//!
//! Ingestion outcomes are emitted as structured events (`tag`, `source`,
//! `subject`, `raw_notification` fields), so JSON output is the default.

use crate::{Error, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" | "text" => Some(Self::Pretty),
            _ => None,
        }
    }

    /// `CIRCUITWATCH_LOG_FORMAT`, falling back to JSON.
    pub fn from_env() -> Result<Self> {
        match std::env::var("CIRCUITWATCH_LOG_FORMAT") {
            Ok(v) if !v.trim().is_empty() => Self::parse(&v).ok_or_else(|| {
                Error::InvalidInput(format!("invalid CIRCUITWATCH_LOG_FORMAT: {v}"))
            }),
            _ => Ok(Self::default()),
        }
    }
}

pub fn init_global_from_env() -> Result<()> {
    init_global(LogFormat::from_env()?)
}

/// Install the global subscriber. `RUST_LOG` controls filtering (default `info`).
pub fn init_global(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };
    installed.map_err(|e| Error::backend("install tracing subscriber", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_log_formats() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("text"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("xml"), None);
    }
}
