mod cli;
mod config;
mod storage;

use crate::cli::ConfigCommand;
use clap::Parser;
use color_eyre::Result;
use tokenvault_core::storage::KeyValueBackend;
use tokenvault_storage::{migration::CleanupOutcome, EncryptedItemStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Entry point wiring the CLI to the encrypted store.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        cli::Command::Version => print_version(),
        cli::Command::Health => run_health_check(&config).await?,
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
        cli::Command::Get { key } => {
            let store = storage::store_from_config(&config)?;
            match fetch(&store, &key).await? {
                Some(value) => println!("{value}"),
                None => println!("(not found)"),
            }
        }
        cli::Command::Set { key, value } => {
            let store = storage::store_from_config(&config)?;
            store
                .set_item(&key, Some(&value))
                .await
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            println!("Stored {key}");
        }
        cli::Command::Remove { key } => {
            let store = storage::store_from_config(&config)?;
            store
                .remove_item(&key)
                .await
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            println!("Removed {key}");
        }
        cli::Command::Logout => {
            let store = storage::store_from_config(&config)?;
            store
                .clear_auth_data()
                .await
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            println!("Auth data cleared");
        }
        cli::Command::Migrate => run_migration(&config).await?,
        cli::Command::Cleanup => run_cleanup(&config).await?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("tokenvault {}", env!("CARGO_PKG_VERSION"));
}

/// Runs a quick health check of the encrypted storage path.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let store = storage::store_from_config(config)?;
    run_store_health(&store).await?;
    println!("Storage: ok");
    Ok(())
}

async fn run_store_health<S: KeyValueBackend, B: KeyValueBackend>(
    store: &EncryptedItemStore<S, B>,
) -> Result<()> {
    let check_key = "health.check";
    let payload = "ok";
    store
        .set_item(check_key, Some(payload))
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    let round_trip = fetch(store, check_key).await?;
    store
        .remove_item(check_key)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;

    if round_trip.as_deref() != Some(payload) {
        color_eyre::eyre::bail!("storage round-trip failed");
    }
    Ok(())
}

async fn fetch<S: KeyValueBackend, B: KeyValueBackend>(
    store: &EncryptedItemStore<S, B>,
    key: &str,
) -> Result<Option<String>> {
    store
        .fetch_item(key)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

async fn run_migration(config: &config::Config) -> Result<()> {
    let manager = storage::migration_from_config(config)?;
    let report = manager
        .try_migrate()
        .await
        .map_err(|e| color_eyre::eyre::eyre!("migration failed, safe to retry: {e}"))?;

    if report.already_migrated {
        println!("Already migrated");
    } else if report.migrated.is_empty() {
        println!("No legacy data found");
    } else {
        println!("Migrated {} entries:", report.migrated.len());
        for key in report.migrated {
            println!("    {key}");
        }
    }
    Ok(())
}

async fn run_cleanup(config: &config::Config) -> Result<()> {
    let manager = storage::migration_from_config(config)?;
    let outcome = manager
        .cleanup()
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;

    match outcome {
        CleanupOutcome::Skipped => println!("Migration not completed yet; nothing removed"),
        CleanupOutcome::Completed { removed } => {
            println!("Removed {removed} legacy entries")
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;

    #[tokio::test]
    async fn health_check_with_test_store_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = storage::test_store(dir.path());
        run_store_health(&store)
            .await
            .expect("health check should succeed");

        assert_eq!(store.get_item("health.check").await, None);
        assert!(store.secure_backend().is_empty());
    }

    #[tokio::test]
    async fn fetch_reports_missing_key_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = storage::test_store(dir.path());
        let value = fetch(&store, "auth.access_token").await.expect("fetch");
        assert_eq!(value, None);
    }
}
