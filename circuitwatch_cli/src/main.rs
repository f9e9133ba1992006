use circuitwatch_cli::cli::{Cli, Commands};
use circuitwatch_cli::inventory::Inventory;
use circuitwatch_cli::sources::{runnable_sources, select_sources};
use circuitwatch_core::{IngestEngine, IngestSettings, LedgerStore, WatchConfig};
use circuitwatch_integrations::default_registry;
use clap::Parser;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    circuitwatch_core::o11y::init_global_from_env()?;
    let cli = Cli::parse();
    let cfg = WatchConfig::from_env()?;

    let cmd = cli.command.unwrap_or(Commands::Run {
        dry_run: false,
        since: None,
        sources: Vec::new(),
    });

    match cmd {
        Commands::Run {
            dry_run,
            since,
            sources,
        } => {
            let sources = runnable_sources(select_sources(&cfg, &sources)?)?;
            let store = LedgerStore::open(&cfg.database_path).await?;
            let engine = IngestEngine::new(
                store,
                Arc::new(default_registry()),
                IngestSettings::from(&cfg),
            );
            let report = engine.run(&sources, since, dry_run).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::TestAuth { sources } => {
            let mut failed = 0usize;
            for selected in select_sources(&cfg, &sources)? {
                let (ok, message) = match &selected.built {
                    Ok(source) => source.test_authentication().await,
                    Err(e) => (false, e.to_string()),
                };
                println!(
                    "{}: {} ({message})",
                    selected.settings.name,
                    if ok { "ok" } else { "error" }
                );
                if !ok {
                    failed += 1;
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} source(s) failed authentication");
            }
        }
        Commands::ImportInventory { path } => {
            let inventory = Inventory::load(&path).await?;
            let store = LedgerStore::open(&cfg.database_path).await?;
            let summary = inventory.apply(&store).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Migrate => {
            // Opening applies the schema.
            LedgerStore::open(&cfg.database_path).await?;
            tracing::info!(path = %cfg.database_path.display(), "ledger schema applied");
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&cfg.redacted())?);
        }
    }

    Ok(())
}
