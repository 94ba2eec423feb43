use async_trait::async_trait;
use tokenvault_core::storage::{BackendError, KeyValueBackend};

/// Largest value the mobile keychain accepts per entry; desktop keyrings follow the same cap.
pub const DEFAULT_MAX_VALUE_LEN: usize = 2048;

/// Secure backend on the OS keyring. Each entry is stored as `(service, name)`.
#[derive(Debug, Clone)]
pub struct KeyringBackend {
    service: String,
    max_value_len: usize,
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            max_value_len: DEFAULT_MAX_VALUE_LEN,
        }
    }

    pub fn with_max_value_len(mut self, max_value_len: usize) -> Self {
        self.max_value_len = max_value_len;
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, name: &str) -> Result<keyring::Entry, BackendError> {
        keyring::Entry::new(&self.service, name).map_err(unavailable)
    }

    fn check_capacity(&self, name: &str, value: &str) -> Result<(), BackendError> {
        if value.len() > self.max_value_len {
            return Err(BackendError::CapacityExceeded {
                name: name.to_string(),
                len: value.len(),
                limit: self.max_value_len,
            });
        }
        Ok(())
    }
}

// Keyring operations are synchronous; they are wrapped in async for trait compatibility.
#[async_trait]
impl KeyValueBackend for KeyringBackend {
    async fn get(&self, name: &str) -> Result<Option<String>, BackendError> {
        match self.entry(name)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(unavailable(err)),
        }
    }

    async fn set(&self, name: &str, value: &str) -> Result<(), BackendError> {
        self.check_capacity(name, value)?;
        self.entry(name)?.set_password(value).map_err(unavailable)
    }

    async fn delete(&self, name: &str) -> Result<(), BackendError> {
        match self.entry(name)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(unavailable(err)),
        }
    }
}

fn unavailable(err: keyring::Error) -> BackendError {
    BackendError::Unavailable {
        reason: format!("keyring: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn oversized_values_are_rejected_before_touching_the_keyring() {
        let backend = KeyringBackend::new("tokenvault-test").with_max_value_len(8);
        let err = backend
            .set("auth.session", "0123456789")
            .await
            .expect_err("should exceed capacity");

        assert_eq!(
            err,
            BackendError::CapacityExceeded {
                name: "auth.session".into(),
                len: 10,
                limit: 8,
            }
        );
    }

    #[test]
    fn hex_key_fits_default_capacity() {
        let backend = KeyringBackend::new("tokenvault-test");
        assert!(backend.check_capacity("crypto_key_0123456789", &"ab".repeat(32)).is_ok());
        assert_eq!(backend.service(), "tokenvault-test");
    }
}
