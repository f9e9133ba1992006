//! Provider and circuit inventory import.
//!
//! The ledger does not own the inventory; operators load it from a JSON
//! export of their circuit database:
//!
//! ```json
//! {"providers": [{"slug": "ntt", "name": "NTT", "notification_emails": "noc@ntt.net",
//!                 "circuits": ["CID-1", "CID-2"]}]}
//! ```

use circuitwatch_core::{LedgerStore, Provider, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryProvider {
    pub slug: String,
    pub name: String,
    /// Comma-separated sender allow-list.
    #[serde(default)]
    pub notification_emails: String,
    #[serde(default)]
    pub parser_type: Option<String>,
    #[serde(default)]
    pub circuits: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub providers: Vec<InventoryProvider>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub providers: usize,
    pub circuits: usize,
}

impl Inventory {
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Upsert every provider and circuit. Re-importing the same file is a no-op.
    #[tracing::instrument(level = "info", skip_all, fields(providers = self.providers.len()))]
    pub async fn apply(&self, store: &LedgerStore) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        for entry in &self.providers {
            let mut provider = Provider::new(&entry.slug, &entry.name, &entry.notification_emails)?;
            if let Some(parser_type) = &entry.parser_type {
                provider = provider.with_parser_type(parser_type);
            }
            let stored = store.upsert_provider(&provider).await?;
            summary.providers += 1;
            for cid in &entry.circuits {
                store.upsert_circuit(stored.id, cid).await?;
                summary.circuits += 1;
            }
        }
        tracing::info!(?summary, "inventory imported");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn import_is_idempotent() {
        let inventory: Inventory = serde_json::from_str(
            r#"{"providers":[
                {"slug":"ntt","name":"NTT","notification_emails":"noc@ntt.net","circuits":["CID-1","CID-2"]},
                {"slug":"lumen","name":"Lumen","notification_emails":"noc@lumen.com","parser_type":"bcop"}
            ]}"#,
        )
        .unwrap();
        let store = LedgerStore::in_memory().await.unwrap();

        let first = inventory.apply(&store).await.unwrap();
        assert_eq!(first, ImportSummary { providers: 2, circuits: 2 });
        inventory.apply(&store).await.unwrap();

        let providers = store.list_providers().await.unwrap();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].slug, "lumen");
        assert_eq!(providers[0].provider_type(), "bcop");
        assert_eq!(providers[1].notification_emails, vec!["noc@ntt.net"]);
    }
}
