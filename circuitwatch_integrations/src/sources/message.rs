//! RFC 822 message extraction shared by the mail-based sources.

use chrono::{DateTime, TimeZone, Utc};
use circuitwatch_core::source::extract_sender_address;
use circuitwatch_core::{MaintenanceNotification, NotificationPayload, SenderDirectory};
use mailparse::{MailHeaderMap, ParsedMail};

/// Resolve a raw message to a provider and keep the parts its parser accepts.
///
/// `received` is the server-side arrival time; it stands in for a missing or
/// unparseable `Date` header so the stamp stays stable across re-fetches.
///
/// Returns `None` (after logging) when the message cannot be parsed, has no
/// usable date, its sender is not allow-listed, or it carries no accepted part.
#[tracing::instrument(level = "debug", skip(raw, directory), fields(bytes = raw.len()))]
pub fn extract_notification(
    raw: &[u8],
    source_header: &str,
    directory: &SenderDirectory,
    source_name: &str,
    fallback_id: &str,
    received: Option<DateTime<Utc>>,
) -> Option<MaintenanceNotification> {
    let parsed = match mailparse::parse_mail(raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(source = source_name, message_id = fallback_id, error = %e, "unparseable message dropped");
            return None;
        }
    };

    let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
    let message_id = parsed
        .headers
        .get_first_value("Message-ID")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback_id.to_string());

    let Some(sender) = parsed
        .headers
        .get_first_value(source_header)
        .as_deref()
        .and_then(extract_sender_address)
    else {
        tracing::warn!(source = source_name, %message_id, header = source_header, "message lacks sender header");
        return None;
    };

    let Some(date) = header_date(&parsed).or(received) else {
        tracing::warn!(source = source_name, %message_id, "message has no usable date; dropped");
        return None;
    };

    let Some(route) = directory.lookup(&sender) else {
        tracing::warn!(source = source_name, %message_id, %sender, "sender matches no provider");
        return None;
    };
    if route.content_types.is_empty() {
        tracing::warn!(
            source = source_name,
            %message_id,
            provider = %route.slug,
            "no parser content types known for provider"
        );
        return None;
    }

    let mut payloads = Vec::new();
    collect_parts(&parsed, &route.content_types, &mut payloads);
    if payloads.is_empty() {
        tracing::warn!(
            source = source_name,
            %message_id,
            provider = %route.slug,
            expected = ?route.content_types,
            "message has no part the provider parser accepts"
        );
        return None;
    }

    Some(MaintenanceNotification {
        source: source_name.to_string(),
        message_id,
        subject,
        sender,
        provider_slug: route.slug.clone(),
        provider_type: route.provider_type.clone(),
        date,
        raw: raw.to_vec(),
        payloads,
    })
}

fn collect_parts(part: &ParsedMail<'_>, accepted: &[String], out: &mut Vec<NotificationPayload>) {
    let mimetype = part.ctype.mimetype.to_ascii_lowercase();
    if accepted.iter().any(|c| *c == mimetype) {
        match part.get_body_raw() {
            Ok(body) => out.push(NotificationPayload::new(mimetype, body)),
            Err(e) => tracing::debug!(error = %e, %mimetype, "undecodable part skipped"),
        }
    }
    for sub in &part.subparts {
        collect_parts(sub, accepted, out);
    }
}

fn header_date(parsed: &ParsedMail<'_>) -> Option<DateTime<Utc>> {
    parsed
        .headers
        .get_first_value("Date")
        .and_then(|d| mailparse::dateparse(&d).ok())
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
}

#[cfg(test)]
mod tests {
    use super::*;
    use circuitwatch_core::source::ProviderRoute;
    use circuitwatch_core::Provider;

    fn directory() -> SenderDirectory {
        let ntt = Provider::new("ntt", "NTT", "noc@ntt.net").unwrap();
        let zayo = Provider::new("zayo", "Zayo", "mr@zayo.com").unwrap();
        SenderDirectory::new(vec![
            ProviderRoute::from_provider(&ntt, vec!["text/calendar".to_string()]),
            ProviderRoute::from_provider(&zayo, Vec::new()),
        ])
    }

    fn message(from: &str) -> Vec<u8> {
        message_with_date(from, "Date: Tue, 2 Jul 2024 09:30:00 +0000\r\n")
    }

    fn message_with_date(from: &str, date_header: &str) -> Vec<u8> {
        format!(
            "From: {from}\r\n\
X-Original-Sender: \"NTT NOC\" <noc@ntt.net>\r\n\
Subject: Planned work\r\n\
Message-ID: <abc@ntt.net>\r\n\
{date_header}\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XX\"\r\n\
\r\n\
--XX\r\n\
Content-Type: text/plain\r\n\
\r\n\
See the attached calendar.\r\n\
--XX\r\n\
Content-Type: text/calendar; charset=utf-8\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
QkVHSU46VkNBTEVOREFSDQpFTkQ6VkNBTEVOREFSDQo=\r\n\
--XX--\r\n"
        )
        .into_bytes()
    }

    #[test]
    fn extracts_accepted_parts_for_known_sender() {
        let raw = message("NTT NOC <NOC@ntt.net>");
        let n = extract_notification(&raw, "From", &directory(), "inbox", "uid-1", None).unwrap();
        assert_eq!(n.provider_slug, "ntt");
        assert_eq!(n.sender, "noc@ntt.net");
        assert_eq!(n.subject, "Planned work");
        assert_eq!(n.message_id, "<abc@ntt.net>");
        assert_eq!(n.date, Utc.with_ymd_and_hms(2024, 7, 2, 9, 30, 0).unwrap());
        assert_eq!(n.payloads.len(), 1);
        assert_eq!(n.payloads[0].content_type, "text/calendar");
        assert_eq!(n.payloads[0].text(), "BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n");
        assert_eq!(n.raw, raw);
    }

    #[test]
    fn custom_header_overrides_from() {
        let raw = message("list-relay@example.org");
        assert!(extract_notification(&raw, "From", &directory(), "inbox", "uid-1", None).is_none());
        let n = extract_notification(&raw, "X-Original-Sender", &directory(), "inbox", "uid-1", None)
            .unwrap();
        assert_eq!(n.provider_slug, "ntt");
    }

    #[test]
    fn dateless_message_uses_server_arrival_time() {
        let raw = message_with_date("noc@ntt.net", "");
        let received = Utc.with_ymd_and_hms(2024, 7, 2, 9, 31, 5).unwrap();
        let first =
            extract_notification(&raw, "From", &directory(), "inbox", "uid-1", Some(received))
                .unwrap();
        let again =
            extract_notification(&raw, "From", &directory(), "inbox", "uid-1", Some(received))
                .unwrap();
        assert_eq!(first.date, received);
        assert_eq!(first.date, again.date);

        assert!(extract_notification(&raw, "From", &directory(), "inbox", "uid-1", None).is_none());

        let garbled = message_with_date("noc@ntt.net", "Date: sometime soon\r\n");
        let n = extract_notification(&garbled, "From", &directory(), "inbox", "uid-1", Some(received))
            .unwrap();
        assert_eq!(n.date, received);
    }

    #[test]
    fn date_header_wins_over_arrival_time() {
        let raw = message("noc@ntt.net");
        let received = Utc.with_ymd_and_hms(2024, 7, 3, 0, 0, 0).unwrap();
        let n = extract_notification(&raw, "From", &directory(), "inbox", "uid-1", Some(received))
            .unwrap();
        assert_eq!(n.date, Utc.with_ymd_and_hms(2024, 7, 2, 9, 30, 0).unwrap());
    }

    #[test]
    fn provider_without_content_types_is_dropped() {
        let raw = message("mr@zayo.com");
        assert!(extract_notification(&raw, "From", &directory(), "inbox", "uid-1", None).is_none());
    }
}
