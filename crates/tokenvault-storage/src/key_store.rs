use rand::{rngs::OsRng, RngCore};
use tokenvault_core::storage::KeyValueBackend;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{error::StorageError, key_id::KeyIdentifier};

/// Prefix for encryption-key entries in the secure backend.
pub const KEY_NAME_PREFIX: &str = "crypto_key_";

/// Length of an encryption key in bytes.
pub const KEY_LEN: usize = 32;

/// 256-bit symmetric key for a single logical entry. Zeroized on drop; never log the bytes.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn from_hex(secret: &str) -> Result<Self, StorageError> {
        let mut bytes = hex::decode(secret.trim()).map_err(|e| StorageError::CorruptKey {
            reason: e.to_string(),
        })?;

        if bytes.len() != KEY_LEN {
            let len = bytes.len();
            bytes.zeroize();
            return Err(StorageError::CorruptKey {
                reason: format!("expected {KEY_LEN} bytes, got {len}"),
            });
        }

        let mut out = [0u8; KEY_LEN];
        out.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self(out))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Per-identifier key storage on top of a secure backend (OS keychain in production).
pub struct EncryptionKeyStore<S: KeyValueBackend> {
    backend: S,
}

impl<S: KeyValueBackend> EncryptionKeyStore<S> {
    pub fn new(backend: S) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Return the key for `id`, generating and persisting a fresh one if none exists.
    pub async fn get_or_create(&self, id: &KeyIdentifier) -> Result<EncryptionKey, StorageError> {
        if let Some(existing) = self.get(id).await? {
            return Ok(existing);
        }
        self.create(id).await
    }

    /// Generate and persist a fresh key for `id`, replacing any existing one.
    pub async fn create(&self, id: &KeyIdentifier) -> Result<EncryptionKey, StorageError> {
        let key = EncryptionKey::generate();
        let mut encoded = key.to_hex();
        let written = self.backend.set(&entry_name(id), &encoded).await;
        encoded.zeroize();
        written.map_err(StorageError::KeyStoreUnavailable)?;
        debug!(key_id = %id, "generated encryption key");
        Ok(key)
    }

    /// Look up the key for `id` without creating one.
    pub async fn get(&self, id: &KeyIdentifier) -> Result<Option<EncryptionKey>, StorageError> {
        let stored = self
            .backend
            .get(&entry_name(id))
            .await
            .map_err(StorageError::KeyStoreUnavailable)?;

        match stored {
            Some(mut secret) => {
                let key = EncryptionKey::from_hex(&secret);
                secret.zeroize();
                key.map(Some)
            }
            None => Ok(None),
        }
    }

    /// Remove the key for `id`; deleting a missing key succeeds.
    pub async fn delete(&self, id: &KeyIdentifier) -> Result<(), StorageError> {
        self.backend
            .delete(&entry_name(id))
            .await
            .map_err(StorageError::KeyStoreUnavailable)
    }
}

fn entry_name(id: &KeyIdentifier) -> String {
    format!("{KEY_NAME_PREFIX}{id}")
}
