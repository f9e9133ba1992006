//! IMAP mailbox source.
//!
//! `imaps://host[:port][/folder]` connects over implicit TLS (default port
//! 993); `imap://` upgrades with STARTTLS (default port 143). The folder
//! defaults to `INBOX`. The `imap` crate is blocking, so every session runs
//! on the blocking pool under the configured fetch timeout.

use super::message::extract_notification;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use circuitwatch_core::{
    Error, MaintenanceNotification, NotificationSource, Result, SenderDirectory, SourceSettings,
};
use std::collections::BTreeSet;
use std::net::TcpStream;
use std::time::Duration;
use tracing::instrument;

type ImapSession = imap::Session<native_tls::TlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    implicit_tls: bool,
    host: String,
    port: u16,
    folder: String,
}

impl Endpoint {
    fn from_url(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| Error::InvalidInput(format!("mailbox url '{url}' has no scheme")))?;
        let implicit_tls = match scheme.to_ascii_lowercase().as_str() {
            "imaps" => true,
            "imap" => false,
            other => {
                return Err(Error::InvalidInput(format!(
                    "mailbox url scheme '{other}' is not imap/imaps"
                )));
            }
        };
        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidInput(format!("invalid port in '{url}'")))?;
                (host, port)
            }
            None => (authority, if implicit_tls { 993 } else { 143 }),
        };
        if host.is_empty() {
            return Err(Error::InvalidInput(format!("mailbox url '{url}' has no host")));
        }
        let folder = path.trim_matches('/');
        Ok(Self {
            implicit_tls,
            host: host.to_string(),
            port,
            folder: if folder.is_empty() { "INBOX" } else { folder }.to_string(),
        })
    }

    fn login(&self, account: &str, secret: &str) -> Result<ImapSession> {
        let tls = native_tls::TlsConnector::builder()
            .build()
            .map_err(|e| Error::backend("native-tls", e))?;
        let addr = (self.host.as_str(), self.port);
        let client = if self.implicit_tls {
            imap::connect(addr, &self.host, &tls)
        } else {
            imap::connect_starttls(addr, &self.host, &tls)
        }
        .map_err(|e| imap_error("connect", e))?;
        client
            .login(account, secret)
            .map_err(|(e, _)| Error::Unauthorized(format!("imap login for '{account}' failed: {e}")))
    }
}

fn imap_error(context: &str, e: imap::Error) -> Error {
    Error::BackendMessage(format!("imap {context}: {e}"))
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// One UID SEARCH per allow-listed sender.
fn search_queries(settings: &SourceSettings, senders: &[String], since: DateTime<Utc>) -> Vec<String> {
    let since = since.format("%d-%b-%Y");
    senders
        .iter()
        .map(|sender| {
            if settings.uses_default_header() {
                format!("SINCE {since} FROM {}", quote(sender))
            } else {
                format!(
                    "SINCE {since} HEADER {} {}",
                    quote(&settings.source_header),
                    quote(sender)
                )
            }
        })
        .collect()
}

pub struct MailboxSource {
    settings: SourceSettings,
    endpoint: Endpoint,
    timeout: Duration,
}

impl MailboxSource {
    pub fn new(settings: SourceSettings, timeout: Duration) -> Result<Self> {
        settings.validate()?;
        let endpoint = Endpoint::from_url(&settings.url)?;
        Ok(Self {
            settings,
            endpoint,
            timeout,
        })
    }

    fn secret(&self) -> Result<String> {
        self.settings
            .secret
            .clone()
            .ok_or_else(|| Error::InvalidInput(format!("source '{}' has no secret", self.settings.name)))
    }

    async fn blocking<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        match tokio::time::timeout(self.timeout, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(Error::backend("imap worker", join)),
            Err(_) => Err(Error::BackendMessage(format!(
                "imap {op} timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

/// A message body with its UID and the server's INTERNALDATE.
struct FetchedMessage {
    uid: u32,
    body: Vec<u8>,
    received: Option<DateTime<Utc>>,
}

fn fetch_raw(
    endpoint: Endpoint,
    account: String,
    secret: String,
    queries: Vec<String>,
) -> Result<Vec<FetchedMessage>> {
    let mut session = endpoint.login(&account, &secret)?;
    session
        .select(&endpoint.folder)
        .map_err(|e| imap_error("select", e))?;

    let mut uids = BTreeSet::new();
    for query in &queries {
        let found = session
            .uid_search(query)
            .map_err(|e| imap_error("search", e))?;
        uids.extend(found);
    }

    let mut out = Vec::with_capacity(uids.len());
    if !uids.is_empty() {
        let set = uids
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let fetches = session
            .uid_fetch(&set, "(RFC822 INTERNALDATE)")
            .map_err(|e| imap_error("fetch", e))?;
        for fetch in fetches.iter() {
            if let (Some(uid), Some(body)) = (fetch.uid, fetch.body()) {
                out.push(FetchedMessage {
                    uid,
                    body: body.to_vec(),
                    received: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
                });
            }
        }
    }

    if let Err(e) = session.logout() {
        tracing::debug!(error = %e, "imap logout failed");
    }
    Ok(out)
}

#[async_trait]
impl NotificationSource for MailboxSource {
    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    #[instrument(level = "info", skip(self, directory), fields(source = %self.settings.name))]
    async fn fetch(
        &self,
        directory: &SenderDirectory,
        since: DateTime<Utc>,
    ) -> Result<Vec<MaintenanceNotification>> {
        let queries = search_queries(&self.settings, &directory.senders(), since);
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let endpoint = self.endpoint.clone();
        let account = self.settings.account.clone();
        let secret = self.secret()?;
        let messages = self
            .blocking("fetch", move || fetch_raw(endpoint, account, secret, queries))
            .await?;
        tracing::debug!(count = messages.len(), "imap messages fetched");

        Ok(messages
            .into_iter()
            .filter_map(|m| {
                extract_notification(
                    &m.body,
                    &self.settings.source_header,
                    directory,
                    &self.settings.name,
                    &format!("imap-uid-{}", m.uid),
                    m.received,
                )
            })
            .collect())
    }

    async fn test_authentication(&self) -> (bool, String) {
        let endpoint = self.endpoint.clone();
        let account = self.settings.account.clone();
        let secret = match self.secret() {
            Ok(secret) => secret,
            Err(e) => return (false, e.to_string()),
        };
        let result = self
            .blocking("login", move || {
                let mut session = endpoint.login(&account, &secret)?;
                session.logout().map_err(|e| imap_error("logout", e))
            })
            .await;
        match result {
            Ok(()) => (true, "Test OK".to_string()),
            Err(e) => (false, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn endpoint_defaults_follow_scheme() {
        let e = Endpoint::from_url("imaps://mail.example.net").unwrap();
        assert_eq!((e.implicit_tls, e.port, e.folder.as_str()), (true, 993, "INBOX"));
        let e = Endpoint::from_url("imap://mail.example.net:1143/Carriers/NOC").unwrap();
        assert_eq!((e.implicit_tls, e.port), (false, 1143));
        assert_eq!(e.host, "mail.example.net");
        assert_eq!(e.folder, "Carriers/NOC");
        assert!(Endpoint::from_url("https://mail.example.net").is_err());
        assert!(Endpoint::from_url("imaps://:993").is_err());
    }

    #[test]
    fn search_uses_header_criteria_when_not_from() {
        let since = Utc.with_ymd_and_hms(2024, 7, 2, 9, 0, 0).unwrap();
        let senders = vec!["noc@ntt.net".to_string()];
        let mut settings = SourceSettings::new("noc", "imaps://mail.example.net");
        assert_eq!(
            search_queries(&settings, &senders, since),
            vec!["SINCE 02-Jul-2024 FROM \"noc@ntt.net\""]
        );
        settings.source_header = "X-Original-Sender".to_string();
        assert_eq!(
            search_queries(&settings, &senders, since),
            vec!["SINCE 02-Jul-2024 HEADER \"X-Original-Sender\" \"noc@ntt.net\""]
        );
    }
}
