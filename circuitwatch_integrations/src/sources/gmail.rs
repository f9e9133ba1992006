//! Gmail API source.
//!
//! Authorizes either with a stored OAuth refresh token (`authorized_user`
//! credentials) or with a service-account key using domain-wide delegation to
//! the configured account. Messages are listed with a Gmail search query and
//! fetched in `raw` format so they go through the same RFC 822 extraction as
//! the IMAP source.

use super::message::extract_notification;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use circuitwatch_core::{
    Error, MaintenanceNotification, NotificationSource, Result, SenderDirectory, SourceKind,
    SourceSettings,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::instrument;

const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const MAX_PAGES: usize = 10;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Google credential file, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum GoogleCredentials {
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
}

impl GoogleCredentials {
    fn token_uri(&self) -> &str {
        match self {
            Self::AuthorizedUser { token_uri, .. } | Self::ServiceAccount { token_uri, .. } => {
                token_uri
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct MessagesListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: String,
    raw: String,
    /// Arrival time in epoch milliseconds, serialized as a string.
    #[serde(rename = "internalDate", default)]
    internal_date: Option<String>,
}

impl RawMessage {
    fn received(&self) -> Option<DateTime<Utc>> {
        self.internal_date
            .as_deref()
            .and_then(|ms| ms.trim().parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

/// Gmail search string: `after:<epoch>` plus an OR group of `from:` terms.
///
/// Gmail cannot search arbitrary headers, so a non-`From` source header only
/// narrows by date and leaves sender matching to extraction.
fn search_query(settings: &SourceSettings, senders: &[String], since: DateTime<Utc>) -> String {
    let mut q = format!("after:{}", since.timestamp());
    if settings.uses_default_header() && !senders.is_empty() {
        let terms = senders
            .iter()
            .map(|s| format!("from:{s}"))
            .collect::<Vec<_>>()
            .join(" ");
        q.push_str(&format!(" {{{terms}}}"));
    }
    q
}

fn decode_raw(raw: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(raw.trim().trim_end_matches('='))
        .map_err(|e| Error::backend("gmail raw message", e))
}

pub struct GmailSource {
    settings: SourceSettings,
    credentials: GoogleCredentials,
    client: Client,
    token: Mutex<Option<CachedToken>>,
}

impl GmailSource {
    pub fn new(settings: SourceSettings, timeout: Duration) -> Result<Self> {
        settings.validate()?;
        let path = settings.credentials_file.clone().ok_or_else(|| {
            Error::InvalidInput(format!("source '{}' has no credentials_file", settings.name))
        })?;
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| Error::backend(format!("read credentials {}", path.display()), e))?;
        let credentials: GoogleCredentials = serde_json::from_str(&raw)
            .map_err(|e| Error::backend(format!("parse credentials {}", path.display()), e))?;
        Self::with_credentials(settings, credentials, timeout)
    }

    fn with_credentials(
        settings: SourceSettings,
        credentials: GoogleCredentials,
        timeout: Duration,
    ) -> Result<Self> {
        match (settings.kind()?, &credentials) {
            (SourceKind::GmailOAuth, GoogleCredentials::AuthorizedUser { .. })
            | (SourceKind::GmailServiceAccount, GoogleCredentials::ServiceAccount { .. }) => {}
            (kind, _) => {
                return Err(Error::InvalidInput(format!(
                    "source '{}' of kind {kind:?} does not match its credentials file",
                    settings.name
                )));
            }
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::backend_reqwest)?;
        Ok(Self {
            settings,
            credentials,
            client,
            token: Mutex::new(None),
        })
    }

    fn scopes(&self) -> String {
        std::iter::once(READONLY_SCOPE)
            .chain(self.settings.extra_scopes.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn token_form(&self) -> Result<Vec<(&'static str, String)>> {
        match &self.credentials {
            GoogleCredentials::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
                ..
            } => Ok(vec![
                ("grant_type", "refresh_token".to_string()),
                ("client_id", client_id.clone()),
                ("client_secret", client_secret.clone()),
                ("refresh_token", refresh_token.clone()),
            ]),
            GoogleCredentials::ServiceAccount {
                client_email,
                private_key,
                token_uri,
            } => {
                let now = Utc::now().timestamp();
                let claims = AssertionClaims {
                    iss: client_email,
                    sub: &self.settings.account,
                    scope: self.scopes(),
                    aud: token_uri,
                    iat: now,
                    exp: now + 3600,
                };
                let key = EncodingKey::from_rsa_pem(private_key.as_bytes())
                    .map_err(|e| Error::backend("service account key", e))?;
                let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
                    .map_err(|e| Error::backend("sign service account assertion", e))?;
                Ok(vec![
                    ("grant_type", JWT_BEARER_GRANT.to_string()),
                    ("assertion", assertion),
                ])
            }
        }
    }

    /// Cached access token, refreshed a minute before expiry.
    #[instrument(level = "debug", skip(self), fields(source = %self.settings.name))]
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at - ChronoDuration::seconds(60) > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let resp = self
            .client
            .post(self.credentials.token_uri())
            .form(&self.token_form()?)
            .send()
            .await
            .map_err(Error::backend_reqwest)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Unauthorized(format!(
                "token request failed ({status}): {body}"
            )));
        }
        let token: TokenResponse = resp.json().await.map_err(Error::backend_reqwest)?;
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
        });
        Ok(token.access_token)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: String,
        query: &[(&str, String)],
    ) -> Result<T> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(Error::backend_reqwest)?;
        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Unauthorized(format!(
                "gmail api rejected credentials ({})",
                resp.status()
            ))),
            _ => resp
                .error_for_status()
                .map_err(Error::backend_reqwest)?
                .json()
                .await
                .map_err(Error::backend_reqwest),
        }
    }

    async fn list_message_ids(&self, q: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let mut query = vec![("q", q.to_string()), ("maxResults", "100".to_string())];
            query.extend(self.settings.labels.iter().map(|l| ("labelIds", l.clone())));
            if let Some(tok) = &page_token {
                query.push(("pageToken", tok.clone()));
            }
            let page: MessagesListResponse =
                self.get_json(format!("{API_BASE}/messages"), &query).await?;
            ids.extend(page.messages.into_iter().map(|m| m.id));
            page_token = page.next_page_token;
            if page_token.is_none() {
                return Ok(ids);
            }
        }
        tracing::warn!(
            source = %self.settings.name,
            fetched = ids.len(),
            "gmail listing truncated after {MAX_PAGES} pages"
        );
        Ok(ids)
    }
}

#[async_trait]
impl NotificationSource for GmailSource {
    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    #[instrument(level = "info", skip(self, directory), fields(source = %self.settings.name))]
    async fn fetch(
        &self,
        directory: &SenderDirectory,
        since: DateTime<Utc>,
    ) -> Result<Vec<MaintenanceNotification>> {
        let q = search_query(&self.settings, &directory.senders(), since);
        let ids = self.list_message_ids(&q).await?;
        tracing::debug!(count = ids.len(), %q, "gmail messages listed");

        let mut out = Vec::new();
        for id in ids {
            let message: RawMessage = self
                .get_json(
                    format!("{API_BASE}/messages/{id}"),
                    &[("format", "raw".to_string())],
                )
                .await?;
            let raw = decode_raw(&message.raw)?;
            if let Some(n) = extract_notification(
                &raw,
                &self.settings.source_header,
                directory,
                &self.settings.name,
                &message.id,
                message.received(),
            ) {
                out.push(n);
            }
        }
        Ok(out)
    }

    async fn test_authentication(&self) -> (bool, String) {
        let profile: Result<serde_json::Value> =
            self.get_json(format!("{API_BASE}/profile"), &[]).await;
        match profile {
            Ok(_) => (true, "Test OK".to_string()),
            Err(e) => (false, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn settings(url: &str) -> SourceSettings {
        let mut s = SourceSettings::new("gmail", url);
        s.account = "noc@example.net".to_string();
        s.credentials_file = Some("unused.json".into());
        s
    }

    #[test]
    fn credential_file_type_selects_variant() {
        let user: GoogleCredentials = serde_json::from_str(
            r#"{"type":"authorized_user","client_id":"id","client_secret":"s","refresh_token":"r"}"#,
        )
        .unwrap();
        assert_eq!(user.token_uri(), DEFAULT_TOKEN_URI);
        let sa: GoogleCredentials = serde_json::from_str(
            r#"{"type":"service_account","client_email":"svc@p.iam.gserviceaccount.com","private_key":"k","token_uri":"https://example.test/token"}"#,
        )
        .unwrap();
        assert_eq!(sa.token_uri(), "https://example.test/token");
    }

    #[test]
    fn kind_must_match_credentials() {
        let user = GoogleCredentials::AuthorizedUser {
            client_id: "id".into(),
            client_secret: "s".into(),
            refresh_token: "r".into(),
            token_uri: default_token_uri(),
        };
        let timeout = Duration::from_secs(5);
        assert!(GmailSource::with_credentials(
            settings("https://accounts.google.com/o/oauth2/auth"),
            user.clone(),
            timeout
        )
        .is_ok());
        assert!(GmailSource::with_credentials(
            settings("https://oauth2.googleapis.com/token"),
            user,
            timeout
        )
        .is_err());
    }

    #[test]
    fn refresh_token_form_and_scopes() {
        let mut s = settings("https://accounts.google.com/o/oauth2/auth");
        s.extra_scopes = vec!["https://www.googleapis.com/auth/calendar.readonly".to_string()];
        let source = GmailSource::with_credentials(
            s,
            GoogleCredentials::AuthorizedUser {
                client_id: "id".into(),
                client_secret: "s".into(),
                refresh_token: "r".into(),
                token_uri: default_token_uri(),
            },
            Duration::from_secs(5),
        )
        .unwrap();
        let form = source.token_form().unwrap();
        assert_eq!(form[0], ("grant_type", "refresh_token".to_string()));
        assert_eq!(form[3], ("refresh_token", "r".to_string()));
        assert_eq!(
            source.scopes(),
            "https://www.googleapis.com/auth/gmail.readonly https://www.googleapis.com/auth/calendar.readonly"
        );
    }

    #[test]
    fn query_filters_by_date_and_senders() {
        let since = Utc.with_ymd_and_hms(2024, 7, 2, 0, 0, 0).unwrap();
        let senders = vec!["noc@ntt.net".to_string(), "mr@zayo.com".to_string()];
        let mut s = settings("https://accounts.google.com/o/oauth2/auth");
        assert_eq!(
            search_query(&s, &senders, since),
            format!("after:{} {{from:noc@ntt.net from:mr@zayo.com}}", since.timestamp())
        );
        s.source_header = "X-Original-Sender".to_string();
        assert_eq!(
            search_query(&s, &senders, since),
            format!("after:{}", since.timestamp())
        );
    }

    #[test]
    fn raw_messages_decode_with_or_without_padding() {
        assert_eq!(decode_raw("U3ViamVjdDogaGk=").unwrap(), b"Subject: hi");
        assert_eq!(decode_raw("U3ViamVjdDogaGk").unwrap(), b"Subject: hi");
    }

    #[test]
    fn internal_date_is_read_as_epoch_millis() {
        let message: RawMessage = serde_json::from_value(serde_json::json!({
            "id": "18f",
            "raw": "U3ViamVjdDogaGk",
            "internalDate": "1719912665000"
        }))
        .unwrap();
        assert_eq!(
            message.received(),
            Some(Utc.with_ymd_and_hms(2024, 7, 2, 9, 31, 5).unwrap())
        );

        let bare: RawMessage =
            serde_json::from_value(serde_json::json!({"id": "18f", "raw": ""})).unwrap();
        assert_eq!(bare.received(), None);
    }
}
