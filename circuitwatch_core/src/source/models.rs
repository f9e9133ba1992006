use crate::ledger::models::Provider;
use crate::parser::models::NotificationPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message fetched from a source, resolved to a provider and reduced to
/// the payload parts that provider's parser accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceNotification {
    /// Name of the source the message came from.
    pub source: String,
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub provider_slug: String,
    pub provider_type: String,
    pub date: DateTime<Utc>,
    /// Full message as received.
    #[serde(skip)]
    pub raw: Vec<u8>,
    pub payloads: Vec<NotificationPayload>,
}

/// Allow-listed senders of one provider and the payload types it accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRoute {
    pub slug: String,
    pub provider_type: String,
    pub emails: Vec<String>,
    /// Empty when the registry knows no content type for the provider.
    pub content_types: Vec<String>,
}

impl ProviderRoute {
    pub fn from_provider(provider: &Provider, content_types: Vec<String>) -> Self {
        Self {
            slug: provider.slug.clone(),
            provider_type: provider.provider_type().to_string(),
            emails: provider.notification_emails.clone(),
            content_types: content_types
                .into_iter()
                .map(|c| c.to_ascii_lowercase())
                .collect(),
        }
    }
}

/// Lookup table from sender address to provider for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderDirectory {
    routes: Vec<ProviderRoute>,
}

impl SenderDirectory {
    pub fn new(routes: Vec<ProviderRoute>) -> Self {
        Self { routes }
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn routes(&self) -> &[ProviderRoute] {
        &self.routes
    }

    /// Every allow-listed address, deduplicated, in route order.
    pub fn senders(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for email in self.routes.iter().flat_map(|r| r.emails.iter()) {
            if !out.iter().any(|e| e.eq_ignore_ascii_case(email)) {
                out.push(email.clone());
            }
        }
        out
    }

    /// First provider whose allow-list contains `sender` (case-insensitive).
    pub fn lookup(&self, sender: &str) -> Option<&ProviderRoute> {
        let sender = sender.trim();
        self.routes
            .iter()
            .find(|r| r.emails.iter().any(|e| e.eq_ignore_ascii_case(sender)))
    }
}

/// Extract the address from a header value, preferring `<addr>` when present.
pub fn extract_sender_address(header_value: &str) -> Option<String> {
    let value = header_value.trim();
    let addr = match (value.rfind('<'), value.rfind('>')) {
        (Some(open), Some(close)) if open < close => &value[open + 1..close],
        _ => value,
    };
    let addr = addr.trim().trim_matches('"').trim();
    if addr.is_empty() {
        None
    } else {
        Some(addr.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> SenderDirectory {
        let ntt = Provider::new("ntt", "NTT", "noc@ntt.net, maint@ntt.net").unwrap();
        let zayo = Provider::new("zayo", "Zayo", "mr@zayo.com,noc@ntt.net").unwrap();
        SenderDirectory::new(vec![
            ProviderRoute::from_provider(&ntt, vec!["text/calendar".to_string()]),
            ProviderRoute::from_provider(&zayo, vec!["TEXT/HTML".to_string()]),
        ])
    }

    #[test]
    fn sender_address_prefers_angle_brackets() {
        assert_eq!(
            extract_sender_address("\"NTT NOC\" <NOC@ntt.net>").as_deref(),
            Some("noc@ntt.net")
        );
        assert_eq!(
            extract_sender_address(" noc@ntt.net ").as_deref(),
            Some("noc@ntt.net")
        );
        assert_eq!(extract_sender_address("   "), None);
    }

    #[test]
    fn lookup_is_case_insensitive_and_first_match_wins() {
        let dir = directory();
        assert_eq!(dir.lookup("NOC@NTT.NET").unwrap().slug, "ntt");
        assert_eq!(dir.lookup("mr@zayo.com").unwrap().content_types, vec!["text/html"]);
        assert!(dir.lookup("spam@example.com").is_none());
        assert_eq!(
            dir.senders(),
            vec!["noc@ntt.net", "maint@ntt.net", "mr@zayo.com"]
        );
    }
}
