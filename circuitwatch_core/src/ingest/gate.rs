use crate::Result;
use crate::ledger::models::{
    MAX_NOTIFICATION_SENDER_LENGTH, MAX_NOTIFICATION_SUBJECT_LENGTH, Provider, RawNotification,
    truncate_chars,
};
use crate::ledger::sqlite::{find_raw_notification_id, insert_raw_notification};
use crate::source::models::MaintenanceNotification;
use chrono::Utc;
use sqlx::SqliteConnection;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// First sighting; the notification continues through the pipeline.
    Created(RawNotification),
    /// Same (subject, provider, stamp) already stored.
    Duplicate(Uuid),
}

/// Persists a `RawNotification` exactly once per (subject, provider, stamp).
#[derive(Debug, Clone, Copy)]
pub struct IdempotencyGate {
    max_payload_bytes: usize,
}

impl IdempotencyGate {
    pub fn new(max_payload_bytes: usize) -> Self {
        Self { max_payload_bytes }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(subject = %notification.subject))]
    pub async fn admit(
        &self,
        conn: &mut SqliteConnection,
        notification: &MaintenanceNotification,
        provider: &Provider,
    ) -> Result<Admission> {
        let subject = truncate_chars(&notification.subject, MAX_NOTIFICATION_SUBJECT_LENGTH);
        let mut raw = notification.raw.clone();
        raw.truncate(self.max_payload_bytes);

        let entry = RawNotification {
            id: Uuid::new_v4(),
            subject,
            sender: truncate_chars(&notification.sender, MAX_NOTIFICATION_SENDER_LENGTH),
            provider_id: provider.id,
            source: notification.source.clone(),
            stamp: notification.date,
            raw,
            parsed: false,
            created_at: Utc::now(),
        };

        if insert_raw_notification(conn, &entry).await? {
            return Ok(Admission::Created(entry));
        }

        let existing =
            find_raw_notification_id(conn, &entry.subject, entry.provider_id, &entry.stamp)
                .await?
                .unwrap_or(entry.id);
        tracing::debug!(raw_notification = %existing, "raw notification already stored");
        Ok(Admission::Duplicate(existing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerStore;
    use chrono::TimeZone;

    fn notification(raw: Vec<u8>) -> MaintenanceNotification {
        MaintenanceNotification {
            source: "inbox".to_string(),
            message_id: "<1@ntt.net>".to_string(),
            subject: "Scheduled maintenance".to_string(),
            sender: "noc@ntt.net".to_string(),
            provider_slug: "ntt".to_string(),
            provider_type: "ntt".to_string(),
            date: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            raw,
            payloads: Vec::new(),
        }
    }

    #[tokio::test]
    async fn truncates_payload_and_short_circuits_duplicates() {
        let store = LedgerStore::in_memory().await.unwrap();
        let provider = store
            .upsert_provider(&Provider::new("ntt", "NTT", "noc@ntt.net").unwrap())
            .await
            .unwrap();
        let gate = IdempotencyGate::new(16);
        let n = notification(vec![b'x'; 64]);

        let mut tx = store.begin().await.unwrap();
        let first = gate.admit(&mut tx, &n, &provider).await.unwrap();
        let Admission::Created(raw) = first else {
            panic!("expected first admission to create");
        };
        assert_eq!(raw.raw.len(), 16);
        assert!(!raw.parsed);

        let second = gate.admit(&mut tx, &n, &provider).await.unwrap();
        assert_eq!(second, Admission::Duplicate(raw.id));
        tx.commit().await.unwrap();

        assert_eq!(store.count_raw_notifications().await.unwrap(), 1);
    }
}
