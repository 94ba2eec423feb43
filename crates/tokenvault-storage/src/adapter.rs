use std::sync::Arc;

use tokenvault_core::storage::KeyValueBackend;

use crate::{error::StorageError, item_store::EncryptedItemStore};

/// Default namespace used by the identity provider's session persistence.
pub const DEFAULT_PREFIX: &str = "supabase.auth.";

/// Storage adapter handed to the identity provider client: its keys are namespaced under
/// a prefix and routed through the encrypted item store.
pub struct PrefixedItemStore<S: KeyValueBackend, B: KeyValueBackend> {
    store: Arc<EncryptedItemStore<S, B>>,
    prefix: String,
}

impl<S: KeyValueBackend, B: KeyValueBackend> PrefixedItemStore<S, B> {
    pub fn new(store: Arc<EncryptedItemStore<S, B>>) -> Self {
        Self::with_prefix(store, DEFAULT_PREFIX)
    }

    pub fn with_prefix(store: Arc<EncryptedItemStore<S, B>>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    pub async fn get_item(&self, key: &str) -> Option<String> {
        self.store.get_item(&self.full_key(key)).await
    }

    pub async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.store.set_item(&self.full_key(key), Some(value)).await
    }

    pub async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.store.remove_item(&self.full_key(key)).await
    }
}
