//! Concrete `NotificationSource` implementations.

#[cfg(feature = "gmail")]
pub mod gmail;
#[cfg(feature = "mailbox")]
pub mod mailbox;
pub mod message;

use circuitwatch_core::{Error, NotificationSource, Result, SourceKind, SourceSettings};
use std::sync::Arc;
use std::time::Duration;

pub use message::extract_notification;

/// Build the source matching the settings' URL.
#[tracing::instrument(level = "debug", skip(settings), fields(source = %settings.name))]
pub fn build_source(
    settings: &SourceSettings,
    timeout: Duration,
) -> Result<Arc<dyn NotificationSource>> {
    match settings.kind()? {
        #[cfg(feature = "mailbox")]
        SourceKind::Mailbox => Ok(Arc::new(mailbox::MailboxSource::new(
            settings.clone(),
            timeout,
        )?)),
        #[cfg(feature = "gmail")]
        SourceKind::GmailOAuth | SourceKind::GmailServiceAccount => Ok(Arc::new(
            gmail::GmailSource::new(settings.clone(), timeout)?,
        )),
        #[allow(unreachable_patterns)]
        kind => Err(Error::InvalidInput(format!(
            "source '{}' needs {kind:?} support, which this build does not include",
            settings.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_scheme() {
        let settings = SourceSettings::new("odd", "pop3://mail.example.net");
        assert!(build_source(&settings, Duration::from_secs(1)).is_err());
    }

    #[cfg(feature = "mailbox")]
    #[test]
    fn builds_mailbox_source() {
        let mut settings = SourceSettings::new("noc", "imaps://mail.example.net");
        settings.account = "noc@example.net".to_string();
        settings.secret = Some("hunter2".to_string());
        let source = build_source(&settings, Duration::from_secs(1)).unwrap();
        assert_eq!(source.name(), "noc");
    }

    #[cfg(feature = "gmail")]
    #[test]
    fn builds_gmail_source_from_credentials_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sa.json");
        std::fs::write(
            &path,
            r#"{"type":"service_account","client_email":"svc@p.iam.gserviceaccount.com","private_key":"unused"}"#,
        )
        .unwrap();
        let mut settings = SourceSettings::new("gmail", "https://oauth2.googleapis.com/token");
        settings.account = "noc@example.net".to_string();
        settings.credentials_file = Some(path);
        let source = build_source(&settings, Duration::from_secs(1)).unwrap();
        assert_eq!(source.name(), "gmail");
    }
}
