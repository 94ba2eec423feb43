use std::sync::Arc;

use serde_json::Value;
use tokenvault_core::{auth::keys, storage::KeyValueBackend};
use tracing::{info, warn};

use crate::{adapter::DEFAULT_PREFIX, error::StorageError, item_store::EncryptedItemStore};

/// Written to the item store once migration has completed.
pub const MIGRATION_MARKER: &str = "storage.migrated";

const MARKER_SET: &str = "true";

/// Provider session keys written by the legacy adapter (under [`DEFAULT_PREFIX`]).
pub const LEGACY_PROVIDER_KEYS: [&str; 5] = [
    "access_token",
    "refresh_token",
    "expires_at",
    "provider_token",
    "provider_refresh_token",
];

/// Outcome of a migration attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Marker was already set; nothing was read or written.
    pub already_migrated: bool,
    /// Keys copied from the legacy backend, in migration order.
    pub migrated: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Marker not set; legacy entries were left alone.
    Skipped,
    /// Legacy entries were deleted.
    Completed { removed: usize },
}

/// Copies plaintext entries from the legacy secure backend into the encrypted item store.
pub struct MigrationManager<L: KeyValueBackend, S: KeyValueBackend, B: KeyValueBackend> {
    legacy: L,
    store: Arc<EncryptedItemStore<S, B>>,
}

impl<L: KeyValueBackend, S: KeyValueBackend, B: KeyValueBackend> MigrationManager<L, S, B> {
    pub fn new(legacy: L, store: Arc<EncryptedItemStore<S, B>>) -> Self {
        Self { legacy, store }
    }

    /// Run the migration once. Returns `false` on failure; the marker is then left unset and
    /// a later call retries everything.
    pub async fn migrate(&self) -> bool {
        match self.try_migrate().await {
            Ok(_) => true,
            Err(err) => {
                warn!(%err, "storage migration failed, will retry on next call");
                false
            }
        }
    }

    pub async fn try_migrate(&self) -> Result<MigrationReport, StorageError> {
        if self.is_migrated().await? {
            info!("storage already migrated, skipping");
            return Ok(MigrationReport {
                already_migrated: true,
                migrated: Vec::new(),
            });
        }

        info!("migrating legacy secure storage into encrypted store");
        let mut report = MigrationReport::default();
        for key in legacy_keys() {
            let Some(value) = self.legacy.get(&key).await? else {
                continue;
            };

            info!(key = %key, "migrating entry");
            if keys::is_object_key(&key) {
                self.migrate_object(&key, &value).await?;
            } else {
                self.store.set_item(&key, Some(&value)).await?;
            }
            report.migrated.push(key);
        }

        self.store
            .set_item(MIGRATION_MARKER, Some(MARKER_SET))
            .await?;

        if report.migrated.is_empty() {
            info!("no legacy data found to migrate");
        } else {
            info!(count = report.migrated.len(), "storage migration completed");
        }
        Ok(report)
    }

    /// Delete legacy entries, but only once the marker confirms migration finished.
    pub async fn cleanup(&self) -> Result<CleanupOutcome, StorageError> {
        if !self.is_migrated().await? {
            info!("migration not completed yet, skipping legacy cleanup");
            return Ok(CleanupOutcome::Skipped);
        }

        let mut removed = 0;
        for key in legacy_keys() {
            self.legacy.delete(&key).await?;
            removed += 1;
        }
        info!(removed, "legacy secure storage cleaned up");
        Ok(CleanupOutcome::Completed { removed })
    }

    async fn is_migrated(&self) -> Result<bool, StorageError> {
        let marker = self.store.fetch_item(MIGRATION_MARKER).await?;
        Ok(marker.as_deref() == Some(MARKER_SET))
    }

    async fn migrate_object(&self, key: &str, raw: &str) -> Result<(), StorageError> {
        match serde_json::from_str::<Value>(raw) {
            Ok(parsed) => self.store.set_object(key, Some(&parsed)).await,
            Err(err) => {
                warn!(key, %err, "legacy value is not JSON, migrating raw string");
                self.store.set_item(key, Some(raw)).await
            }
        }
    }
}

fn legacy_keys() -> impl Iterator<Item = String> {
    keys::ALL.into_iter().map(str::to_string).chain(
        LEGACY_PROVIDER_KEYS
            .into_iter()
            .map(|key| format!("{DEFAULT_PREFIX}{key}")),
    )
}
