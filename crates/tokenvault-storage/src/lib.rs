//! Encrypted key-value storage for auth secrets.
//! Each logical key gets its own AES-GCM key held in a secure backend (OS keyring or test
//! doubles); ciphertext lives in a bulk backend.

pub mod adapter;
pub mod cipher;
pub mod error;
pub mod file_backend;
pub mod item_store;
pub mod key_id;
pub mod key_store;
pub mod keyring_backend;
pub mod migration;

pub use error::StorageError;
pub use item_store::EncryptedItemStore;
pub use migration::MigrationManager;
