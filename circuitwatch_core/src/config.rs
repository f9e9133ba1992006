use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SOURCE_HEADER: &str = "From";

/// Which transport a source speaks, selected from its URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// IMAP mailbox (`imap://` or `imaps://`).
    Mailbox,
    /// Gmail API authorized with a stored OAuth refresh token.
    GmailOAuth,
    /// Gmail API authorized with a service account (domain-wide delegation).
    GmailServiceAccount,
}

impl SourceKind {
    #[tracing::instrument(level = "debug")]
    pub fn from_url(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| Error::InvalidInput(format!("source url '{url}' has no scheme")))?;
        let host = rest
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default()
            .rsplit('@')
            .next()
            .unwrap_or_default()
            .split(':')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        match scheme.to_ascii_lowercase().as_str() {
            "imap" | "imaps" => Ok(Self::Mailbox),
            "https" if host == "accounts.google.com" => Ok(Self::GmailOAuth),
            "https" if host == "oauth2.googleapis.com" => Ok(Self::GmailServiceAccount),
            other => Err(Error::InvalidInput(format!(
                "unsupported source url scheme/host '{other}://{host}'"
            ))),
        }
    }
}

/// One configured notification source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSettings {
    pub name: String,
    pub url: String,
    /// Mailbox login or, for Gmail, the mailbox owner to read.
    #[serde(default)]
    pub account: String,
    /// Mailbox password. Unused by Gmail variants.
    #[serde(default)]
    pub secret: Option<String>,
    /// Gmail credential JSON (authorized-user or service-account key).
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    /// Header carrying the real sender (mailing-list relays rewrite `From`).
    #[serde(default = "default_source_header")]
    pub source_header: String,
    #[serde(default)]
    pub attach_all_providers: bool,
    /// Provider slugs this source may receive notifications for.
    #[serde(default)]
    pub providers: Vec<String>,
    /// Gmail label filter.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub extra_scopes: Vec<String>,
}

fn default_source_header() -> String {
    DEFAULT_SOURCE_HEADER.to_string()
}

impl SourceSettings {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            account: String::new(),
            secret: None,
            credentials_file: None,
            source_header: default_source_header(),
            attach_all_providers: false,
            providers: Vec::new(),
            labels: Vec::new(),
            extra_scopes: Vec::new(),
        }
    }

    pub fn kind(&self) -> Result<SourceKind> {
        SourceKind::from_url(&self.url)
    }

    /// Whether the provider with this slug is attached to the source.
    pub fn attaches(&self, slug: &str) -> bool {
        self.attach_all_providers || self.providers.iter().any(|p| p.eq_ignore_ascii_case(slug))
    }

    pub fn uses_default_header(&self) -> bool {
        self.source_header.eq_ignore_ascii_case(DEFAULT_SOURCE_HEADER)
    }

    /// Copy with secret material masked, for display.
    pub fn redacted(&self) -> Self {
        Self {
            secret: self.secret.as_ref().map(|_| "********".to_string()),
            ..self.clone()
        }
    }

    #[tracing::instrument(level = "debug", skip(self), fields(source = %self.name))]
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("source name is empty".to_string()));
        }
        let kind = self.kind()?;
        if self.source_header.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "source '{}' has an empty source_header",
                self.name
            )));
        }
        match kind {
            SourceKind::Mailbox => {
                if self.account.trim().is_empty() || self.secret.is_none() {
                    return Err(Error::InvalidInput(format!(
                        "mailbox source '{}' requires account and secret",
                        self.name
                    )));
                }
            }
            SourceKind::GmailOAuth | SourceKind::GmailServiceAccount => {
                if self.credentials_file.is_none() {
                    return Err(Error::InvalidInput(format!(
                        "gmail source '{}' requires credentials_file",
                        self.name
                    )));
                }
                if kind == SourceKind::GmailServiceAccount && self.account.trim().is_empty() {
                    return Err(Error::InvalidInput(format!(
                        "service account source '{}' requires account to impersonate",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Runtime configuration for ingestion runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Lookback window used when the ledger holds no raw notification yet.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// Cap applied to the raw payload stored with each notification.
    #[serde(default = "default_raw_payload_max_bytes")]
    pub raw_payload_max_bytes: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default)]
    pub sources: Vec<SourceSettings>,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/circuitwatch.db")
}

fn default_lookback_days() -> u32 {
    7
}

fn default_raw_payload_max_bytes() -> usize {
    1000
}

fn default_fetch_timeout_secs() -> u64 {
    20
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            lookback_days: default_lookback_days(),
            raw_payload_max_bytes: default_raw_payload_max_bytes(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            sources: Vec::new(),
        }
    }
}

impl WatchConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::backend(format!("read config {}", path.display()), e))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::backend(format!("parse config {}", path.display()), e))
    }

    /// Load `CIRCUITWATCH_CONFIG` (if set) and apply env overrides.
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        let mut cfg = match std::env::var("CIRCUITWATCH_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path)?,
            _ => Self::default(),
        };

        if let Ok(path) = std::env::var("CIRCUITWATCH_DATABASE_PATH") {
            cfg.database_path = PathBuf::from(path);
        }
        if let Some(days) = std::env::var("CIRCUITWATCH_LOOKBACK_DAYS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
        {
            cfg.lookback_days = days;
        }
        if let Some(bytes) = std::env::var("CIRCUITWATCH_RAW_PAYLOAD_MAX_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            cfg.raw_payload_max_bytes = bytes;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn validate(&self) -> Result<()> {
        if self.raw_payload_max_bytes == 0 {
            return Err(Error::InvalidInput(
                "raw_payload_max_bytes must be > 0".to_string(),
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "fetch_timeout_secs must be > 0".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !names.insert(source.name.to_ascii_lowercase()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate source name '{}'",
                    source.name
                )));
            }
        }
        Ok(())
    }

    pub fn redacted(&self) -> Self {
        Self {
            sources: self.sources.iter().map(SourceSettings::redacted).collect(),
            ..self.clone()
        }
    }
}
