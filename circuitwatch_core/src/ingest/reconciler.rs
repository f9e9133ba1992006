//! Reconciles parsed maintenances into the ledger.
//!
//! A maintenance is keyed by `{provider}-{maintenance_id}`. The first sighting
//! creates it; later notifications overwrite it unless they are older than the
//! newest notification already applied, and its circuit impacts are re-derived
//! by diffing the previous and the incoming circuit sets.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use sqlx::SqliteConnection;
use uuid::Uuid;

use super::tagger::{NotificationOutcome, OutcomeTag};
use crate::ledger::models::{
    CircuitImpact, CircuitMaintenance, Note, ParsedNotification, Provider,
    RawNotification, maintenance_name,
};
use crate::ledger::sqlite::{
    delete_impact, ensure_note, find_circuit, find_maintenance_by_name, insert_impact,
    insert_maintenance, insert_parsed_notification, latest_applied_stamp, list_impacts_with_cid,
    update_impact, update_maintenance,
};
use crate::parser::models::{CircuitEntry, Maintenance};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Created(Uuid),
    Updated(Uuid),
    /// Older than the latest applied notification; only the audit record is written.
    OutOfSequence(Uuid),
}

impl Reconciliation {
    pub fn maintenance_id(&self) -> Uuid {
        match self {
            Self::Created(id) | Self::Updated(id) | Self::OutOfSequence(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler;

impl Reconciler {
    pub fn new() -> Self {
        Self
    }

    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(provider = %provider.slug, maintenance = %maintenance.maintenance_id)
    )]
    pub async fn reconcile(
        &self,
        conn: &mut SqliteConnection,
        raw: &RawNotification,
        provider: &Provider,
        maintenance: &Maintenance,
        outcome: &mut NotificationOutcome,
    ) -> Result<Reconciliation> {
        let name = maintenance_name(&provider.slug, &maintenance.maintenance_id);

        let result = match find_maintenance_by_name(conn, &name).await? {
            None => {
                self.create(conn, &name, provider, maintenance, outcome)
                    .await?
            }
            Some(existing) => match latest_applied_stamp(conn, existing.id).await? {
                Some(latest) if raw.stamp < latest => {
                    outcome.tag(
                        OutcomeTag::OutOfSequence,
                        &format!(
                            "notification stamped {} is older than the latest applied update {} for {name}",
                            raw.stamp, latest
                        ),
                    );
                    Reconciliation::OutOfSequence(existing.id)
                }
                _ => {
                    self.update(conn, existing, provider, maintenance, outcome)
                        .await?
                }
            },
        };

        let parsed = ParsedNotification {
            id: Uuid::new_v4(),
            maintenance_id: result.maintenance_id(),
            raw_notification_id: raw.id,
            json: serde_json::to_value(maintenance)
                .map_err(|e| Error::backend("serialize parsed maintenance", e))?,
            created_at: Utc::now(),
        };
        insert_parsed_notification(conn, &parsed).await?;

        Ok(result)
    }

    async fn create(
        &self,
        conn: &mut SqliteConnection,
        name: &str,
        provider: &Provider,
        maintenance: &Maintenance,
        outcome: &mut NotificationOutcome,
    ) -> Result<Reconciliation> {
        let record = CircuitMaintenance {
            id: Uuid::new_v4(),
            name: name.to_string(),
            start_time: maintenance.start,
            end_time: maintenance.end,
            description: maintenance.summary.clone(),
            status: maintenance.status.initial(),
            ack: false,
        };
        insert_maintenance(conn, &record).await?;
        tracing::info!(maintenance = %record.name, "created circuit maintenance");

        let mut impacts = 0usize;
        for entry in dedupe_circuits(&maintenance.circuits).values() {
            if self
                .attach_circuit(conn, record.id, provider, entry, outcome)
                .await?
            {
                impacts += 1;
            }
        }

        if impacts == 0 {
            tracing::warn!(maintenance = %record.name, "circuit maintenance has no circuit impacts");
        }

        Ok(Reconciliation::Created(record.id))
    }

    async fn update(
        &self,
        conn: &mut SqliteConnection,
        mut record: CircuitMaintenance,
        provider: &Provider,
        maintenance: &Maintenance,
        outcome: &mut NotificationOutcome,
    ) -> Result<Reconciliation> {
        record.description = maintenance.summary.clone();
        record.start_time = maintenance.start;
        record.end_time = maintenance.end;
        if let Some(status) = maintenance.status.overwrite() {
            record.status = status;
        }
        record.ack = false;
        update_maintenance(conn, &record).await?;
        tracing::info!(maintenance = %record.name, "updated circuit maintenance");

        let existing: HashMap<String, CircuitImpact> = list_impacts_with_cid(conn, record.id)
            .await?
            .into_iter()
            .map(|(impact, cid)| (cid.trim().to_lowercase(), impact))
            .collect();
        let incoming = dedupe_circuits(&maintenance.circuits);

        let mut impacts = 0usize;
        for (key, entry) in &incoming {
            match existing.get(key) {
                Some(current) => {
                    if current.impact != entry.impact {
                        update_impact(conn, current.id, entry.impact).await?;
                    }
                    impacts += 1;
                }
                None => {
                    if self
                        .attach_circuit(conn, record.id, provider, entry, outcome)
                        .await?
                    {
                        impacts += 1;
                    }
                }
            }
        }

        for (key, stale) in &existing {
            if !incoming.contains_key(key) {
                delete_impact(conn, stale.id).await?;
                tracing::debug!(maintenance = %record.name, circuit = %key, "removed circuit impact");
            }
        }

        if impacts == 0 {
            tracing::warn!(maintenance = %record.name, "circuit maintenance has no circuit impacts");
        }

        Ok(Reconciliation::Updated(record.id))
    }

    /// Create the impact for a parsed circuit, or record it as unresolved.
    /// Returns `false` when the circuit is unknown to the inventory.
    async fn attach_circuit(
        &self,
        conn: &mut SqliteConnection,
        maintenance_id: Uuid,
        provider: &Provider,
        entry: &CircuitEntry,
        outcome: &mut NotificationOutcome,
    ) -> Result<bool> {
        match find_circuit(conn, provider.id, &entry.circuit_id).await? {
            Some(circuit) => {
                insert_impact(
                    conn,
                    &CircuitImpact {
                        id: Uuid::new_v4(),
                        maintenance_id,
                        circuit_id: circuit.id,
                        impact: entry.impact,
                    },
                )
                .await?;
                Ok(true)
            }
            None => {
                let note = Note::unresolved_circuit(maintenance_id, entry.circuit_id.trim());
                ensure_note(conn, &note).await?;
                outcome.tag(
                    OutcomeTag::UnknownCids,
                    &format!(
                        "circuit id {} not found for provider {}",
                        entry.circuit_id, provider.slug
                    ),
                );
                Ok(false)
            }
        }
    }
}

/// Incoming circuits keyed by normalized id; a later duplicate wins.
fn dedupe_circuits(circuits: &[CircuitEntry]) -> BTreeMap<String, CircuitEntry> {
    circuits
        .iter()
        .filter(|c| !c.circuit_id.trim().is_empty())
        .map(|c| (c.normalized_id(), c.clone()))
        .collect()
}
