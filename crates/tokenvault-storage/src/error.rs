use thiserror::Error;
use tokenvault_core::storage::BackendError;

/// Errors surfaced by the encrypted item store and its key store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Secure backend could not be reached. Never treated as "key absent".
    #[error("encryption key store unavailable: {0}")]
    KeyStoreUnavailable(#[source] BackendError),
    /// A stored key did not decode to 32 bytes.
    #[error("stored encryption key is corrupt: {reason}")]
    CorruptKey { reason: String },
    /// Bulk backend read or write failed.
    #[error("bulk backend: {0}")]
    Backend(#[from] BackendError),
    /// Object value could not be serialized to JSON.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Cipher could not seal the value.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },
}
