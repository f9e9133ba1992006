use super::models::{MaintenanceNotification, SenderDirectory};
use crate::Result;
use crate::config::SourceSettings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A mailbox or API endpoint that yields maintenance notifications.
///
/// Implementations live in `circuitwatch_integrations` or customer code.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    fn settings(&self) -> &SourceSettings;

    fn name(&self) -> &str {
        &self.settings().name
    }

    /// Fetch notifications from allow-listed senders received since `since`.
    ///
    /// Messages that match no provider or carry no accepted payload part are
    /// dropped with a warning rather than failing the fetch.
    async fn fetch(
        &self,
        directory: &SenderDirectory,
        since: DateTime<Utc>,
    ) -> Result<Vec<MaintenanceNotification>>;

    /// Check credentials against the endpoint, returning a human readable message.
    async fn test_authentication(&self) -> (bool, String);
}
