use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by key-value backends.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Backend cannot be reached (permission denied, keychain locked, missing platform service).
    #[error("backend unavailable: {reason}")]
    Unavailable { reason: String },
    /// Value exceeds what the backend can hold for a single entry.
    #[error("value for {name} is {len} bytes, backend limit is {limit}")]
    CapacityExceeded {
        name: String,
        len: usize,
        limit: usize,
    },
    /// Read or write failed.
    #[error("backend i/o failure: {reason}")]
    Io { reason: String },
}

/// String key-value contract shared by the secure (keychain) and bulk (disk) backends.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Fetch the value stored under `name`; `None` when nothing is stored.
    async fn get(&self, name: &str) -> Result<Option<String>, BackendError>;

    /// Persist a value under `name`, overwriting any existing entry.
    async fn set(&self, name: &str, value: &str) -> Result<(), BackendError>;

    /// Remove `name` (idempotent).
    async fn delete(&self, name: &str) -> Result<(), BackendError>;
}

#[async_trait]
impl<T: KeyValueBackend + ?Sized> KeyValueBackend for Arc<T> {
    async fn get(&self, name: &str) -> Result<Option<String>, BackendError> {
        (**self).get(name).await
    }

    async fn set(&self, name: &str, value: &str) -> Result<(), BackendError> {
        (**self).set(name, value).await
    }

    async fn delete(&self, name: &str) -> Result<(), BackendError> {
        (**self).delete(name).await
    }
}

/// In-memory backend for tests and smoke runs.
///
/// Clones share the same map, so a test can hand one clone to the store and keep another
/// to inspect raw values and call counts. Failures can be injected per entry name.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<HashMap<String, String>>>,
    fail_next_set: Arc<Mutex<HashSet<String>>>,
    unavailable: Arc<AtomicBool>,
    gets: Arc<AtomicUsize>,
    sets: Arc<AtomicUsize>,
    deletes: Arc<AtomicUsize>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value stored under `name`, bypassing counters and fault injection.
    pub fn peek(&self, name: &str) -> Option<String> {
        self.inner
            .lock()
            .ok()
            .and_then(|map| map.get(name).cloned())
    }

    /// Overwrite a raw value, bypassing counters and fault injection.
    pub fn poke(&self, name: &str, value: impl Into<String>) {
        if let Ok(mut map) = self.inner.lock() {
            map.insert(name.to_string(), value.into());
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the next `set` for `name` fail with an i/o error. Later writes succeed.
    pub fn fail_next_set(&self, name: &str) {
        if let Ok(mut names) = self.fail_next_set.lock() {
            names.insert(name.to_string());
        }
    }

    /// Simulate a locked or inaccessible backend: every call fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable {
                reason: "in-memory backend marked unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn lock_map(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, BackendError> {
        self.inner.lock().map_err(|err| BackendError::Io {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

#[async_trait]
impl KeyValueBackend for InMemoryBackend {
    async fn get(&self, name: &str) -> Result<Option<String>, BackendError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.lock_map()?.get(name).cloned())
    }

    async fn set(&self, name: &str, value: &str) -> Result<(), BackendError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let injected = self
            .fail_next_set
            .lock()
            .map(|mut names| names.remove(name))
            .unwrap_or(false);
        if injected {
            return Err(BackendError::Io {
                reason: format!("injected write failure for {name}"),
            });
        }

        self.lock_map()?.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), BackendError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.lock_map()?.remove(name);
        Ok(())
    }
}
