use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokenvault_core::{
    auth::{keys, EssentialSessionData, EssentialUserData},
    storage::KeyValueBackend,
};
use tracing::{instrument, warn};

use crate::{
    cipher::{self, StoredRecord},
    error::StorageError,
    key_id::KeyIdentifier,
    key_store::EncryptionKeyStore,
};

/// Encrypted key-value store: one AES-GCM key per logical key in the secure backend,
/// sealed records in the bulk backend.
///
/// Operations on the same key identifier are serialized so that key creation and the
/// matching ciphertext write never interleave with another writer.
pub struct EncryptedItemStore<S: KeyValueBackend, B: KeyValueBackend> {
    keys: EncryptionKeyStore<S>,
    bulk: B,
    locks: KeyLocks,
}

impl<S: KeyValueBackend, B: KeyValueBackend> EncryptedItemStore<S, B> {
    pub fn new(secure: S, bulk: B) -> Self {
        Self {
            keys: EncryptionKeyStore::new(secure),
            bulk,
            locks: KeyLocks::default(),
        }
    }

    pub fn secure_backend(&self) -> &S {
        self.keys.backend()
    }

    pub fn bulk_backend(&self) -> &B {
        &self.bulk
    }

    /// Encrypt and persist `value` under `key`. `None` removes the entry and its key.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn set_item(&self, key: &str, value: Option<&str>) -> Result<(), StorageError> {
        let Some(value) = value else {
            return self.remove_item(key).await;
        };

        let id = KeyIdentifier::derive(key);
        let lock = self.locks.for_id(&id);
        let _guard = lock.lock().await;

        let (encryption_key, created) = match self.keys.get(&id).await? {
            Some(existing) => (existing, false),
            None => (self.keys.create(&id).await?, true),
        };

        let written = match cipher::encrypt(value.as_bytes(), &encryption_key) {
            Ok(record) => self
                .bulk
                .set(key, record.as_str())
                .await
                .map_err(StorageError::from),
            Err(e) => Err(StorageError::Encryption {
                reason: e.to_string(),
            }),
        };

        // A key minted for a record that never landed would be orphaned in the keychain.
        if written.is_err() && created {
            if let Err(err) = self.keys.delete(&id).await {
                warn!(%err, "failed to drop encryption key after write failure");
            }
        }
        written
    }

    /// Look up `key`, telling "confirmed absent" (`Ok(None)`) apart from backend failure.
    ///
    /// A missing key, a missing record, or a record that fails its integrity check are all
    /// reported as absent.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn fetch_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let id = KeyIdentifier::derive(key);
        let lock = self.locks.for_id(&id);
        let _guard = lock.lock().await;

        let Some(encryption_key) = self.keys.get(&id).await? else {
            return Ok(None);
        };
        let Some(raw) = self.bulk.get(key).await? else {
            return Ok(None);
        };
        let Some(plaintext) = cipher::decrypt(&StoredRecord::from(raw), &encryption_key) else {
            return Ok(None);
        };

        match String::from_utf8(plaintext) {
            Ok(value) => Ok(Some(value)),
            Err(_) => {
                warn!("decrypted value is not valid UTF-8");
                Ok(None)
            }
        }
    }

    /// Look up `key`; any failure degrades to `None` with a warning.
    pub async fn get_item(&self, key: &str) -> Option<String> {
        match self.fetch_item(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(key, %err, "storage lookup failed, reporting value as absent");
                None
            }
        }
    }

    /// Serialize `value` to JSON and store it. `None` removes the entry.
    pub async fn set_object<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: Option<&T>,
    ) -> Result<(), StorageError> {
        match value {
            Some(value) => {
                let json = serde_json::to_string(value)?;
                self.set_item(key, Some(&json)).await
            }
            None => self.remove_item(key).await,
        }
    }

    /// Fetch and deserialize a JSON value. Unparseable values read as `None`.
    pub async fn get_object<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = self.get_item(key).await?;
        match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, %err, "stored value is not valid JSON for the requested type");
                None
            }
        }
    }

    /// Delete the record and its encryption key (idempotent).
    #[instrument(skip_all, fields(key = %key))]
    pub async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let id = KeyIdentifier::derive(key);
        let lock = self.locks.for_id(&id);
        let _guard = lock.lock().await;

        self.bulk.delete(key).await?;
        self.keys.delete(&id).await
    }

    /// Store tokens plus allow-listed projections of the provider session and user.
    ///
    /// The four writes run concurrently and independently: a failed write does not undo
    /// the others. The first failure (in key order) is returned once all have finished.
    pub async fn store_auth_data(
        &self,
        access_token: &str,
        refresh_token: &str,
        session: Option<&Value>,
        user: Option<&Value>,
    ) -> Result<(), StorageError> {
        let session = session.map(EssentialSessionData::from_provider);
        let user = user.map(EssentialUserData::from_provider);

        let (access, refresh, session, user) = tokio::join!(
            self.set_item(keys::ACCESS_TOKEN, Some(access_token)),
            self.set_item(keys::REFRESH_TOKEN, Some(refresh_token)),
            self.set_object(keys::SESSION, session.as_ref()),
            self.set_object(keys::USER, user.as_ref()),
        );
        first_failure("store", [access, refresh, session, user])
    }

    /// Remove every auth key concurrently.
    pub async fn clear_auth_data(&self) -> Result<(), StorageError> {
        let (access, refresh, session, user) = tokio::join!(
            self.remove_item(keys::ACCESS_TOKEN),
            self.remove_item(keys::REFRESH_TOKEN),
            self.remove_item(keys::SESSION),
            self.remove_item(keys::USER),
        );
        first_failure("clear", [access, refresh, session, user])
    }
}

fn first_failure(action: &str, results: [Result<(), StorageError>; 4]) -> Result<(), StorageError> {
    for (key, result) in keys::ALL.iter().zip(&results) {
        if let Err(err) = result {
            warn!(key, %err, "failed to {action} auth entry");
        }
    }
    results.into_iter().collect()
}

/// Single-flight table: one async mutex per key identifier.
#[derive(Default)]
struct KeyLocks {
    inner: Mutex<HashMap<KeyIdentifier, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    fn for_id(&self, id: &KeyIdentifier) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Entries only the table still references have no holder or waiter.
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        map.entry(id.clone()).or_default().clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::Deserialize;
    use serde_json::json;
    use tokenvault_core::storage::{BackendError, InMemoryBackend};

    use super::*;

    type TestStore = EncryptedItemStore<InMemoryBackend, InMemoryBackend>;

    fn test_store() -> (TestStore, InMemoryBackend, InMemoryBackend) {
        let secure = InMemoryBackend::new();
        let bulk = InMemoryBackend::new();
        (
            EncryptedItemStore::new(secure.clone(), bulk.clone()),
            secure,
            bulk,
        )
    }

    #[tokio::test]
    async fn round_trips_strings() {
        let (store, _, _) = test_store();
        let long = "a1b2c3".repeat(300);

        for value in ["hello", "", "héllo wörld ✓", long.as_str()] {
            store.set_item("k", Some(value)).await.expect("set");
            assert_eq!(store.get_item("k").await.as_deref(), Some(value));
        }
    }

    #[tokio::test]
    async fn persists_tagged_record_with_keyed_digest() {
        let (store, secure, bulk) = test_store();
        store.set_item("k", Some("hello")).await.expect("set");

        let key = EncryptionKeyStore::new(secure)
            .get(&KeyIdentifier::derive("k"))
            .await
            .expect("key store")
            .expect("key persisted");
        let raw = bulk.peek("k").expect("record persisted");
        let (body, hash) = raw.split_once('|').expect("delimiter");
        assert!(body.starts_with(cipher::SEALED_TAG));
        assert_eq!(hash, cipher::keyed_digest(b"hello", &key).expect("digest"));
        assert_ne!(hash, cipher::digest(b"hello"));
        assert_eq!(store.get_item("k").await.as_deref(), Some("hello"));
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Profile {
        name: String,
        tags: Vec<String>,
        nested: HashMap<String, u32>,
    }

    #[tokio::test]
    async fn round_trips_objects() {
        let (store, _, _) = test_store();
        let profile = Profile {
            name: "Ada".into(),
            tags: vec!["admin".into(), "beta".into()],
            nested: HashMap::from([("logins".to_string(), 3)]),
        };

        store
            .set_object("profile", Some(&profile))
            .await
            .expect("set object");
        let loaded: Option<Profile> = store.get_object("profile").await;
        assert_eq!(loaded, Some(profile));
    }

    #[tokio::test]
    async fn unparseable_object_reads_as_none() {
        let (store, _, _) = test_store();
        store.set_item("k", Some("not json")).await.expect("set");
        assert_eq!(store.get_object::<Value>("k").await, None);
    }

    #[tokio::test]
    async fn none_acts_as_tombstone() {
        let (store, secure, bulk) = test_store();
        store.set_item("k", Some("v")).await.expect("set");
        store.set_item("k", None).await.expect("tombstone");

        assert_eq!(store.get_item("k").await, None);
        assert!(secure.is_empty());
        assert!(bulk.is_empty());
    }

    #[tokio::test]
    async fn removal_deletes_key_and_never_regenerates_on_read() {
        let (store, secure, bulk) = test_store();
        store.set_item("k", Some("v")).await.expect("set");
        let stale = bulk.peek("k").expect("record");

        store.remove_item("k").await.expect("remove");
        store.remove_item("k").await.expect("remove again");
        assert_eq!(store.get_item("k").await, None);

        bulk.poke("k", stale);
        assert_eq!(store.get_item("k").await, None);
        assert!(secure.is_empty(), "reads must not create keys");
    }

    #[tokio::test]
    async fn corrupted_ciphertext_reads_as_none() {
        let (store, _, bulk) = test_store();
        store
            .set_item("k", Some("top-secret-payload"))
            .await
            .expect("set");

        let raw = bulk.peek("k").expect("record");
        let (body, hash) = raw.split_once('|').expect("delimiter");
        let encoded = body.strip_prefix(cipher::SEALED_TAG).expect("tag");
        let mut bytes = STANDARD.decode(encoded).expect("base64");
        let last = bytes.len() - 20;
        bytes[last] ^= 0xff;
        bulk.poke(
            "k",
            format!("{}{}|{hash}", cipher::SEALED_TAG, STANDARD.encode(bytes)),
        );

        assert_eq!(store.get_item("k").await, None);
        assert!(matches!(store.fetch_item("k").await, Ok(None)));
    }

    #[tokio::test]
    async fn fetch_distinguishes_failure_from_absence() {
        let (store, secure, _) = test_store();
        store.set_item("k", Some("v")).await.expect("set");
        assert!(matches!(store.fetch_item("missing").await, Ok(None)));

        secure.set_unavailable(true);
        let err = store.fetch_item("k").await.expect_err("should fail");
        assert!(matches!(err, StorageError::KeyStoreUnavailable(_)));
        assert_eq!(store.get_item("k").await, None);
    }

    #[tokio::test]
    async fn set_surfaces_key_store_unavailable() {
        let (store, secure, bulk) = test_store();
        secure.set_unavailable(true);

        let err = store.set_item("k", Some("v")).await.expect_err("should fail");
        assert!(matches!(err, StorageError::KeyStoreUnavailable(_)));
        assert!(bulk.is_empty());
    }

    /// Suspends before every call so concurrent operations interleave at each backend hop.
    #[derive(Clone, Default)]
    struct YieldingBackend(InMemoryBackend);

    #[async_trait::async_trait]
    impl KeyValueBackend for YieldingBackend {
        async fn get(&self, name: &str) -> Result<Option<String>, BackendError> {
            tokio::task::yield_now().await;
            self.0.get(name).await
        }

        async fn set(&self, name: &str, value: &str) -> Result<(), BackendError> {
            tokio::task::yield_now().await;
            self.0.set(name, value).await
        }

        async fn delete(&self, name: &str) -> Result<(), BackendError> {
            tokio::task::yield_now().await;
            self.0.delete(name).await
        }
    }

    #[tokio::test]
    async fn concurrent_writers_share_one_key() {
        let secure = YieldingBackend::default();
        let bulk = YieldingBackend::default();
        let store = EncryptedItemStore::new(secure.clone(), bulk.clone());

        let (first, second, third) = tokio::join!(
            store.set_item("k", Some("one")),
            store.set_item("k", Some("two")),
            store.set_item("k", Some("three")),
        );
        first.expect("first");
        second.expect("second");
        third.expect("third");

        assert_eq!(secure.0.set_count(), 1, "exactly one key generated");
        let value = store.get_item("k").await.expect("value readable");
        assert!(["one", "two", "three"].contains(&value.as_str()));
    }

    #[tokio::test]
    async fn failed_write_does_not_orphan_a_fresh_key() {
        let (store, secure, bulk) = test_store();
        bulk.fail_next_set("k");

        let err = store.set_item("k", Some("v")).await.expect_err("write fails");
        assert!(matches!(err, StorageError::Backend(_)));
        assert!(secure.is_empty(), "fresh key must be dropped");

        store.set_item("k", Some("v")).await.expect("retry");
        bulk.fail_next_set("k");
        store
            .set_item("k", Some("w"))
            .await
            .expect_err("overwrite fails");
        assert_eq!(secure.len(), 1, "existing key is kept");
        assert_eq!(store.get_item("k").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn lock_table_does_not_grow_with_distinct_keys() {
        let (store, _, _) = test_store();
        for n in 0..50 {
            let key = format!("adapter.key.{n}");
            store.set_item(&key, Some("v")).await.expect("set");
            store.get_item(&key).await;
        }
        assert!(store.locks.len() <= 1);
    }

    #[tokio::test]
    async fn store_auth_data_writes_four_projected_entries() {
        let (store, _, bulk) = test_store();
        let session = json!({"expires_in": 3600, "token_type": "bearer", "extra": "x"});
        let user = json!({"id": "u1", "email": "a@b.com", "role": "user", "extra": "x"});

        store
            .store_auth_data("AT", "RT", Some(&session), Some(&user))
            .await
            .expect("store auth data");

        assert_eq!(bulk.set_count(), 4);
        assert_eq!(store.get_item(keys::ACCESS_TOKEN).await.as_deref(), Some("AT"));
        assert_eq!(store.get_item(keys::REFRESH_TOKEN).await.as_deref(), Some("RT"));
        assert_eq!(
            store.get_object::<Value>(keys::SESSION).await,
            Some(json!({"expires_in": 3600, "token_type": "bearer"}))
        );
        assert_eq!(
            store.get_object::<Value>(keys::USER).await,
            Some(json!({"id": "u1", "email": "a@b.com", "role": "user"}))
        );
    }

    #[tokio::test]
    async fn store_auth_data_copies_odd_field_shapes_without_failing() {
        let (store, _, bulk) = test_store();
        let session = json!({"expires_at": 1700000000.5, "token_type": "bearer"});
        let user = json!({"id": 42, "email": null});

        store
            .store_auth_data("AT", "RT", Some(&session), Some(&user))
            .await
            .expect("store auth data");

        assert_eq!(bulk.set_count(), 4);
        assert_eq!(store.get_item(keys::ACCESS_TOKEN).await.as_deref(), Some("AT"));
        assert_eq!(
            store.get_object::<Value>(keys::SESSION).await,
            Some(session)
        );
        assert_eq!(
            store.get_object::<Value>(keys::USER).await,
            Some(json!({"id": 42, "email": null}))
        );
    }

    #[tokio::test]
    async fn store_auth_data_with_user_missing_id_still_writes_tokens() {
        let (store, _, _) = test_store();
        store
            .store_auth_data("AT", "RT", None, Some(&json!({"email": "a@b.com"})))
            .await
            .expect("store auth data");

        assert_eq!(store.get_item(keys::REFRESH_TOKEN).await.as_deref(), Some("RT"));
        assert_eq!(
            store.get_object::<Value>(keys::USER).await,
            Some(json!({"email": "a@b.com"}))
        );
    }

    #[tokio::test]
    async fn store_auth_data_keeps_successful_writes_on_partial_failure() {
        let (store, _, bulk) = test_store();
        bulk.fail_next_set(keys::REFRESH_TOKEN);

        let err = store
            .store_auth_data("AT", "RT", None, Some(&json!({"id": "u1"})))
            .await
            .expect_err("refresh write fails");
        assert!(matches!(err, StorageError::Backend(_)));

        assert_eq!(store.get_item(keys::ACCESS_TOKEN).await.as_deref(), Some("AT"));
        assert_eq!(store.get_item(keys::REFRESH_TOKEN).await, None);
        assert_eq!(store.get_item(keys::SESSION).await, None);
        assert!(store.get_object::<Value>(keys::USER).await.is_some());
    }

    #[tokio::test]
    async fn clear_auth_data_removes_everything() {
        let (store, secure, bulk) = test_store();
        store
            .store_auth_data(
                "AT",
                "RT",
                Some(&json!({"expires_at": 1})),
                Some(&json!({"id": "u1"})),
            )
            .await
            .expect("store");

        store.clear_auth_data().await.expect("clear");
        for key in keys::ALL {
            assert_eq!(store.get_item(key).await, None);
        }
        assert!(secure.is_empty());
        assert!(bulk.is_empty());
    }
}
