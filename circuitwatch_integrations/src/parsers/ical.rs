//! BCOP maintenance calendar parser.
//!
//! Reads `text/calendar` parts whose `VEVENT`s carry the `X-MAINTNOTE-*`
//! properties of the maintenance-notification BCOP. One event yields one
//! [`Maintenance`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use circuitwatch_core::{
    CircuitEntry, Impact, Maintenance, MaintenanceParser, NotificationPayload, ParseError,
    StatusUpdate,
};

pub const CONTENT_TYPE: &str = "text/calendar";

#[derive(Debug, Clone, Copy, Default)]
pub struct BcopCalendarParser;

impl MaintenanceParser for BcopCalendarParser {
    #[tracing::instrument(level = "debug", skip(self, payloads))]
    fn parse(
        &self,
        provider_type: &str,
        payloads: &[NotificationPayload],
    ) -> Result<Vec<Maintenance>, ParseError> {
        let calendars: Vec<&NotificationPayload> = payloads
            .iter()
            .filter(|p| p.content_type == CONTENT_TYPE)
            .collect();
        if calendars.is_empty() {
            return Err(ParseError::NoSupportedPayload {
                expected: vec![CONTENT_TYPE.to_string()],
            });
        }

        let mut out = Vec::new();
        for payload in calendars {
            for event in events(&unfold(&payload.text()))? {
                out.push(event.into_maintenance()?);
            }
        }
        tracing::debug!(provider_type, count = out.len(), "parsed calendar events");
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Property {
    name: String,
    params: Vec<(String, String)>,
    value: String,
}

impl Property {
    fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Default)]
struct Event {
    props: Vec<Property>,
}

impl Event {
    fn first(&self, name: &str) -> Option<&Property> {
        self.props.iter().find(|p| p.name == name)
    }

    fn text(&self, name: &str) -> Option<String> {
        self.first(name)
            .map(|p| unescape(&p.value))
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str) -> Result<String, ParseError> {
        self.text(name)
            .ok_or_else(|| ParseError::structural(format!("VEVENT is missing {name}")))
    }

    fn datetime(&self, name: &str) -> Result<DateTime<Utc>, ParseError> {
        let prop = self
            .first(name)
            .ok_or_else(|| ParseError::structural(format!("VEVENT is missing {name}")))?;
        parse_datetime(&prop.value).ok_or_else(|| {
            ParseError::structural(format!("{name} has invalid value '{}'", prop.value))
        })
    }

    fn into_maintenance(self) -> Result<Maintenance, ParseError> {
        let default_impact = match self.text("X-MAINTNOTE-IMPACT") {
            Some(raw) => parse_impact(&raw)?,
            None => Impact::default(),
        };

        let mut circuits = Vec::new();
        for prop in self.props.iter().filter(|p| p.name == "X-MAINTNOTE-OBJECT-ID") {
            let impact = match prop.param("X-MAINTNOTE-OBJECT-IMPACT") {
                Some(raw) => parse_impact(raw)?,
                None => default_impact,
            };
            let cid = unescape(&prop.value);
            if !cid.trim().is_empty() {
                circuits.push(CircuitEntry::new(cid.trim(), impact));
            }
        }

        let sequence = match self.text("SEQUENCE") {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|_| ParseError::structural(format!("SEQUENCE '{raw}' is not a number")))?,
            None => 0,
        };

        let start = self.datetime("DTSTART")?;
        let end = self.datetime("DTEND")?;
        if end < start {
            return Err(ParseError::structural("DTEND precedes DTSTART"));
        }

        Ok(Maintenance {
            maintenance_id: self.required("X-MAINTNOTE-MAINTENANCE-ID")?,
            provider: self.required("X-MAINTNOTE-PROVIDER")?,
            account: self.text("X-MAINTNOTE-ACCOUNT"),
            uid: self.text("UID"),
            sequence,
            organizer: self.text("ORGANIZER"),
            start,
            end,
            summary: self.text("SUMMARY").unwrap_or_default(),
            status: StatusUpdate::from_raw(&self.required("X-MAINTNOTE-STATUS")?),
            stamp: self.datetime("DTSTAMP")?,
            circuits,
        })
    }
}

fn parse_impact(raw: &str) -> Result<Impact, ParseError> {
    raw.parse::<Impact>()
        .map_err(|e| ParseError::structural(e.to_string()))
}

/// Join folded continuation lines (RFC 5545 §3.1).
fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        match line.chars().next() {
            Some(' ') | Some('\t') if !lines.is_empty() => {
                if let Some(last) = lines.last_mut() {
                    last.push_str(&line[1..]);
                }
            }
            _ if line.is_empty() => {}
            _ => lines.push(line.to_string()),
        }
    }
    lines
}

fn parse_property(line: &str) -> Option<Property> {
    let mut in_quotes = false;
    let mut split = None;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                split = Some(i);
                break;
            }
            _ => {}
        }
    }
    let split = split?;
    let (head, value) = (&line[..split], &line[split + 1..]);

    let mut parts = head.split(';');
    let name = parts.next()?.trim().to_ascii_uppercase();
    if name.is_empty() {
        return None;
    }
    let params = parts
        .filter_map(|p| p.split_once('='))
        .map(|(k, v)| (k.trim().to_ascii_uppercase(), v.trim().trim_matches('"').to_string()))
        .collect();
    Some(Property {
        name,
        params,
        value: value.to_string(),
    })
}

fn events(lines: &[String]) -> Result<Vec<Event>, ParseError> {
    let mut out = Vec::new();
    let mut current: Option<Event> = None;
    let mut saw_calendar = false;

    for line in lines {
        let Some(prop) = parse_property(line) else {
            return Err(ParseError::structural(format!("malformed content line '{line}'")));
        };
        let marker = (prop.name.clone(), prop.value.trim().to_ascii_uppercase());
        match (marker.0.as_str(), marker.1.as_str()) {
            ("BEGIN", "VCALENDAR") => saw_calendar = true,
            ("BEGIN", "VEVENT") => {
                if current.is_some() {
                    return Err(ParseError::structural("nested VEVENT"));
                }
                current = Some(Event::default());
            }
            ("END", "VEVENT") => match current.take() {
                Some(event) => out.push(event),
                None => return Err(ParseError::structural("END:VEVENT without BEGIN")),
            },
            _ => {
                if let Some(event) = current.as_mut() {
                    event.props.push(prop);
                }
            }
        }
    }

    if !saw_calendar {
        return Err(ParseError::structural("payload is not a VCALENDAR"));
    }
    if current.is_some() {
        return Err(ParseError::structural("unterminated VEVENT"));
    }
    Ok(out)
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// UTC `19980119T070000Z`, floating `19980119T070000` (read as UTC) or a bare date.
fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let naive = raw.strip_suffix('Z').unwrap_or(raw);
    if let Ok(dt) = NaiveDateTime::parse_from_str(naive, "%Y%m%dT%H%M%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    NaiveDate::parse_from_str(naive, "%Y%m%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use circuitwatch_core::MaintenanceStatus;

    const CALENDAR: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//Maint Note//https://github.com/maint-notification//\r\n\
BEGIN:VEVENT\r\n\
SUMMARY:Maint Note Example\r\n\
DTSTART;VALUE=DATE-TIME:20151010T080000Z\r\n\
DTEND;VALUE=DATE-TIME:20151010T100000Z\r\n\
DTSTAMP;VALUE=DATE-TIME:20151010T001000Z\r\n\
UID:42\r\n\
SEQUENCE:1\r\n\
X-MAINTNOTE-PROVIDER:example.com\r\n\
X-MAINTNOTE-ACCOUNT:137.035999173\r\n\
X-MAINTNOTE-MAINTENANCE-ID:WorkOrder-31415\r\n\
X-MAINTNOTE-OBJECT-ID;X-MAINTNOTE-OBJECT-IMPACT=NO-IMPACT:acme-widgets-as-a-\r\n \
service\r\n\
X-MAINTNOTE-OBJECT-ID:acme-widgets-as-a-service-2\r\n\
X-MAINTNOTE-IMPACT:DEGRADED\r\n\
X-MAINTNOTE-STATUS:TENTATIVE\r\n\
ORGANIZER;CN=\"Example NOC\":mailto:noone@example.com\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    fn payload(body: &str) -> Vec<NotificationPayload> {
        vec![
            NotificationPayload::new("text/html", "<p>see attachment</p>"),
            NotificationPayload::new("TEXT/CALENDAR", body),
        ]
    }

    #[test]
    fn parses_reference_event() {
        let out = BcopCalendarParser.parse("example", &payload(CALENDAR)).unwrap();
        assert_eq!(out.len(), 1);
        let m = &out[0];
        assert_eq!(m.maintenance_id, "WorkOrder-31415");
        assert_eq!(m.provider, "example.com");
        assert_eq!(m.account.as_deref(), Some("137.035999173"));
        assert_eq!(m.sequence, 1);
        assert_eq!(m.organizer.as_deref(), Some("mailto:noone@example.com"));
        assert_eq!(m.status, StatusUpdate::Known(MaintenanceStatus::Tentative));
        assert_eq!(m.start, Utc.with_ymd_and_hms(2015, 10, 10, 8, 0, 0).unwrap());
        assert_eq!(m.stamp, Utc.with_ymd_and_hms(2015, 10, 10, 0, 10, 0).unwrap());
        assert_eq!(
            m.circuits,
            vec![
                CircuitEntry::new("acme-widgets-as-a-service", Impact::NoImpact),
                CircuitEntry::new("acme-widgets-as-a-service-2", Impact::Degraded),
            ]
        );
    }

    #[test]
    fn calendar_without_events_yields_nothing() {
        let body = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nEND:VCALENDAR\r\n";
        assert!(BcopCalendarParser.parse("example", &payload(body)).unwrap().is_empty());
    }

    #[test]
    fn missing_required_property_is_structural() {
        let body = CALENDAR.replace("X-MAINTNOTE-STATUS:TENTATIVE\r\n", "");
        let err = BcopCalendarParser.parse("example", &payload(&body)).unwrap_err();
        assert!(matches!(err, ParseError::Structural(ref m) if m.contains("X-MAINTNOTE-STATUS")));
    }

    #[test]
    fn no_change_status_is_the_sentinel() {
        let body = CALENDAR.replace("STATUS:TENTATIVE", "STATUS:NO-CHANGE");
        let out = BcopCalendarParser.parse("example", &payload(&body)).unwrap();
        assert_eq!(out[0].status, StatusUpdate::Unchanged);
    }

    #[test]
    fn requires_a_calendar_part() {
        let err = BcopCalendarParser
            .parse("example", &[NotificationPayload::new("text/plain", "hello")])
            .unwrap_err();
        assert!(matches!(err, ParseError::NoSupportedPayload { .. }));
    }

    #[test]
    fn garbage_is_structural() {
        let err = BcopCalendarParser
            .parse("example", &payload("this is not a calendar"))
            .unwrap_err();
        assert!(matches!(err, ParseError::Structural(_)));
    }
}
