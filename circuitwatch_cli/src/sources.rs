//! Source selection for CLI commands.

use circuitwatch_core::{NotificationSource, SourceSettings, WatchConfig};
use circuitwatch_integrations::build_source;
use std::sync::Arc;

/// A configured source and the result of constructing it.
pub struct SelectedSource<'a> {
    pub settings: &'a SourceSettings,
    pub built: circuitwatch_core::Result<Arc<dyn NotificationSource>>,
}

/// Build the sources named in `names`, or every configured source when empty.
/// Naming a source that is not configured is an error.
pub fn select_sources<'a>(
    cfg: &'a WatchConfig,
    names: &[String],
) -> anyhow::Result<Vec<SelectedSource<'a>>> {
    if let Some(missing) = names
        .iter()
        .find(|n| !cfg.sources.iter().any(|s| s.name.eq_ignore_ascii_case(n)))
    {
        anyhow::bail!("no source named '{missing}' is configured");
    }
    Ok(cfg
        .sources
        .iter()
        .filter(|s| names.is_empty() || names.iter().any(|n| n.eq_ignore_ascii_case(&s.name)))
        .map(|settings| SelectedSource {
            settings,
            built: build_source(settings, cfg.fetch_timeout()),
        })
        .collect())
}

/// Sources usable for an ingestion run. A source that fails to build is
/// logged and left out; the run only fails when none is left.
pub fn runnable_sources(
    selected: Vec<SelectedSource<'_>>,
) -> anyhow::Result<Vec<Arc<dyn NotificationSource>>> {
    let mut out = Vec::new();
    for SelectedSource { settings, built } in selected {
        match built {
            Ok(source) => out.push(source),
            Err(e) => tracing::warn!(
                source = %settings.name,
                error = %e,
                "source could not be initialized; skipping"
            ),
        }
    }
    if out.is_empty() {
        anyhow::bail!("no notification source could be initialized");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config() -> WatchConfig {
        let mut mailbox = SourceSettings::new("noc", "imaps://mail.example.net");
        mailbox.account = "noc@example.net".to_string();
        mailbox.secret = Some("hunter2".to_string());

        let mut gmail = SourceSettings::new("gmail", "https://oauth2.googleapis.com/token");
        gmail.account = "noc@example.net".to_string();
        gmail.credentials_file = Some(PathBuf::from("/nonexistent/circuitwatch/key.json"));

        WatchConfig {
            sources: vec![mailbox, gmail],
            ..WatchConfig::default()
        }
    }

    #[test]
    fn broken_source_is_skipped_for_runs() {
        let cfg = config();
        let selected = select_sources(&cfg, &[]).unwrap();
        assert_eq!(selected.len(), 2);
        assert!(selected[0].built.is_ok());
        assert!(selected[1].built.is_err());

        let runnable = runnable_sources(selected).unwrap();
        assert_eq!(runnable.len(), 1);
        assert_eq!(runnable[0].name(), "noc");
    }

    #[test]
    fn run_fails_when_no_source_builds() {
        let cfg = config();
        let selected = select_sources(&cfg, &["GMAIL".to_string()]).unwrap();
        assert_eq!(selected.len(), 1);
        assert!(runnable_sources(selected).is_err());
    }

    #[test]
    fn unknown_source_name_is_rejected() {
        let cfg = config();
        assert!(select_sources(&cfg, &["archive".to_string()]).is_err());
    }
}
