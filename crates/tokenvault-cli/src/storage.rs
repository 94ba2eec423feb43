use std::{path::PathBuf, sync::Arc};

use crate::config::Config;
use color_eyre::Result;
use dirs::data_dir;
#[cfg(test)]
use tokenvault_core::storage::InMemoryBackend;
use tokenvault_storage::{
    file_backend::FileBackend, keyring_backend::KeyringBackend, EncryptedItemStore,
    MigrationManager,
};
use tracing::debug;

pub type ProductionStore = EncryptedItemStore<KeyringBackend, FileBackend>;
pub type ProductionMigration = MigrationManager<KeyringBackend, KeyringBackend, FileBackend>;

/// Resolve the default data directory for Tokenvault.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("tokenvault"))
}

/// Build the encrypted store: keys in the OS keyring, records under the data directory.
pub fn store_from_config(config: &Config) -> Result<ProductionStore> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    let keyring = config.resolve_keyring();
    debug!(?root, service = %keyring.service, "initializing encrypted store");

    Ok(EncryptedItemStore::new(
        KeyringBackend::new(keyring.service).with_max_value_len(keyring.max_value_len),
        FileBackend::new(root),
    ))
}

/// Build a migration manager reading legacy entries from the configured legacy service.
pub fn migration_from_config(config: &Config) -> Result<ProductionMigration> {
    let keyring = config.resolve_keyring();
    let store = Arc::new(store_from_config(config)?);
    debug!(legacy_service = %keyring.legacy_service, "initializing storage migration");
    Ok(MigrationManager::new(
        KeyringBackend::new(keyring.legacy_service),
        store,
    ))
}

/// Helper for tests to construct a store rooted at a temp dir with an in-memory keychain.
#[cfg(test)]
pub fn test_store(root: impl Into<PathBuf>) -> EncryptedItemStore<InMemoryBackend, FileBackend> {
    EncryptedItemStore::new(InMemoryBackend::new(), FileBackend::new(root))
}
