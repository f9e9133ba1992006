use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::SqliteConnection;

use super::gate::{Admission, IdempotencyGate};
use super::models::RunReport;
use super::reconciler::Reconciler;
use super::tagger::{NotificationOutcome, OutcomeTag};
use crate::config::WatchConfig;
use crate::ledger::LedgerStore;
use crate::ledger::models::Provider;
use crate::ledger::sqlite::mark_raw_parsed;
use crate::parser::traits::ParserRegistry;
use crate::source::models::{MaintenanceNotification, ProviderRoute, SenderDirectory};
use crate::source::traits::NotificationSource;
use crate::{Error, Result};

/// Knobs the engine needs from `WatchConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSettings {
    pub lookback_days: u32,
    pub raw_payload_max_bytes: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            lookback_days: 7,
            raw_payload_max_bytes: 1000,
        }
    }
}

impl From<&WatchConfig> for IngestSettings {
    fn from(cfg: &WatchConfig) -> Self {
        Self {
            lookback_days: cfg.lookback_days,
            raw_payload_max_bytes: cfg.raw_payload_max_bytes,
        }
    }
}

/// Drives sources through the gate, the parser adapter and the reconciler.
///
/// Every notification is processed inside its own transaction; a failure
/// rolls back only that notification and the loop moves on.
pub struct IngestEngine {
    store: LedgerStore,
    registry: Arc<dyn ParserRegistry>,
    gate: IdempotencyGate,
    reconciler: Reconciler,
    settings: IngestSettings,
}

impl IngestEngine {
    #[tracing::instrument(level = "debug", skip(store, registry))]
    pub fn new(
        store: LedgerStore,
        registry: Arc<dyn ParserRegistry>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            store,
            registry,
            gate: IdempotencyGate::new(settings.raw_payload_max_bytes),
            reconciler: Reconciler::new(),
            settings,
        }
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    /// Stamp of the newest stored raw notification, else now minus the lookback window.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn watermark(&self) -> Result<DateTime<Utc>> {
        match self.store.latest_raw_stamp().await? {
            Some(stamp) => Ok(stamp),
            None => Ok(Utc::now() - Duration::days(i64::from(self.settings.lookback_days))),
        }
    }

    /// Allow-listed senders for the providers attached to a source.
    pub fn sender_directory(
        &self,
        source: &dyn NotificationSource,
        providers: &[Provider],
    ) -> SenderDirectory {
        let settings = source.settings();
        let mut routes = Vec::new();
        for provider in providers.iter().filter(|p| settings.attaches(&p.slug)) {
            if provider.notification_emails.is_empty() {
                tracing::warn!(
                    source = %settings.name,
                    provider = %provider.slug,
                    "provider has no notification email configured; skipping"
                );
                continue;
            }
            let content_types = self
                .registry
                .content_types(provider.provider_type())
                .unwrap_or_default();
            routes.push(ProviderRoute::from_provider(provider, content_types));
        }
        SenderDirectory::new(routes)
    }

    /// Fetch from every source, then process each notification.
    ///
    /// Returns the ids of raw notifications the run created or touched.
    #[tracing::instrument(level = "info", skip(self, sources), fields(sources = sources.len()))]
    pub async fn run(
        &self,
        sources: &[Arc<dyn NotificationSource>],
        since: Option<DateTime<Utc>>,
        dry_run: bool,
    ) -> Result<RunReport> {
        if sources.is_empty() {
            return Err(Error::InvalidInput(
                "no notification sources configured".to_string(),
            ));
        }

        let since = match since {
            Some(since) => since,
            None => self.watermark().await?,
        };
        let providers = self.store.list_providers().await?;
        tracing::info!(%since, dry_run, "starting ingestion run");

        let mut notifications = Vec::new();
        for source in sources {
            let directory = self.sender_directory(source.as_ref(), &providers);
            if directory.is_empty() {
                tracing::warn!(
                    source = %source.name(),
                    "no provider with notification emails attached; skipping source"
                );
                continue;
            }
            match source.fetch(&directory, since).await {
                Ok(mut fetched) => {
                    tracing::info!(
                        source = %source.name(),
                        count = fetched.len(),
                        "fetched notifications"
                    );
                    notifications.append(&mut fetched);
                }
                Err(e) => {
                    tracing::warn!(source = %source.name(), error = %e, "source fetch failed");
                }
            }
        }

        let providers: HashMap<String, Provider> =
            providers.into_iter().map(|p| (p.slug.clone(), p)).collect();

        let mut report = RunReport::default();
        for notification in &notifications {
            let outcome = self
                .process_in_transaction(notification, &providers, dry_run)
                .await;
            report.record(outcome);
        }

        tracing::info!(
            processed = report.outcomes.len(),
            touched = report.raw_notification_ids.len(),
            dry_run,
            "ingestion run finished"
        );
        Ok(report)
    }

    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(source = %notification.source, subject = %notification.subject)
    )]
    async fn process_in_transaction(
        &self,
        notification: &MaintenanceNotification,
        providers: &HashMap<String, Provider>,
        dry_run: bool,
    ) -> NotificationOutcome {
        let mut outcome =
            NotificationOutcome::new(notification.source.clone(), notification.subject.clone());

        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                tracing::error!(error = %e, "could not open transaction");
                outcome.tag(OutcomeTag::ParsingFailed, &format!("transaction failed: {e}"));
                return outcome;
            }
        };

        let result = self
            .process_notification(&mut tx, notification, providers, &mut outcome)
            .await;

        let finished = match result {
            Ok(()) if dry_run => tx.rollback().await,
            Ok(()) => tx.commit().await,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    message_id = %notification.message_id,
                    "processing notification failed; rolled back"
                );
                outcome.rolled_back(&format!("processing failed: {e}"));
                if let Err(rb) = tx.rollback().await {
                    tracing::error!(error = %rb, "rollback failed");
                }
                Ok(())
            }
        };
        if let Err(e) = finished {
            tracing::error!(error = %e, "finishing notification transaction failed");
            outcome.rolled_back(&format!("commit failed: {e}"));
        }
        outcome
    }

    /// Gate → parser adapter → reconciler for one notification.
    pub async fn process_notification(
        &self,
        conn: &mut SqliteConnection,
        notification: &MaintenanceNotification,
        providers: &HashMap<String, Provider>,
        outcome: &mut NotificationOutcome,
    ) -> Result<()> {
        let Some(provider) = providers.get(&notification.provider_slug) else {
            outcome.tag(
                OutcomeTag::UnknownProvider,
                &format!("provider '{}' is not known", notification.provider_slug),
            );
            return Ok(());
        };

        let raw = match self.gate.admit(conn, notification, provider).await? {
            Admission::Created(raw) => raw,
            Admission::Duplicate(id) => {
                tracing::debug!(raw_notification = %id, "duplicate notification skipped");
                return Ok(());
            }
        };
        outcome.raw_notification_id = Some(raw.id);

        let Some(parser) = self.registry.init_parser(&notification.provider_type) else {
            outcome.tag(
                OutcomeTag::ParsingFailed,
                &format!(
                    "no parser mapped to provider type '{}'",
                    notification.provider_type
                ),
            );
            return Ok(());
        };

        let maintenances = match parser.parse(&notification.provider_type, &notification.payloads)
        {
            Ok(maintenances) => maintenances,
            Err(e) => {
                outcome.tag(OutcomeTag::ParsingFailed, &format!("parsing failed: {e}"));
                return Ok(());
            }
        };

        if maintenances.is_empty() {
            outcome.tag(
                OutcomeTag::Ignored,
                "notification did not describe any maintenance",
            );
            return Ok(());
        }

        mark_raw_parsed(conn, raw.id).await?;
        outcome.tag(
            OutcomeTag::Parsed,
            &format!("parsed {} maintenance(s)", maintenances.len()),
        );
        for maintenance in &maintenances {
            let result = self
                .reconciler
                .reconcile(conn, &raw, provider, maintenance, outcome)
                .await?;
            tracing::debug!(?result, "maintenance reconciled");
        }
        Ok(())
    }
}
