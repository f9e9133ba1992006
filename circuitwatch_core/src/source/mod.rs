//! Notification sources: the capability interface concrete mailboxes/APIs
//! implement, and the sender directory they use to map a message to a provider.

pub mod models;
pub mod traits;

pub use models::{MaintenanceNotification, ProviderRoute, SenderDirectory, extract_sender_address};
pub use traits::NotificationSource;
