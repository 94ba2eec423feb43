use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokenvault_core::storage::{BackendError, KeyValueBackend};
use tracing::instrument;

/// Bulk backend: one file per entry under a root directory, replaced atomically on write.
/// Values are stored as given; callers are expected to hand in ciphertext.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(sanitize_name(name))
    }
}

#[async_trait]
impl KeyValueBackend for FileBackend {
    #[instrument(skip_all, fields(name = %name))]
    async fn get(&self, name: &str) -> Result<Option<String>, BackendError> {
        match fs::read_to_string(self.path_for(name)) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(err)),
        }
    }

    #[instrument(skip_all, fields(name = %name))]
    async fn set(&self, name: &str, value: &str) -> Result<(), BackendError> {
        fs::create_dir_all(&self.root).map_err(io_err)?;

        let mut tmp = NamedTempFile::new_in(&self.root).map_err(io_err)?;
        tmp.write_all(value.as_bytes()).map_err(io_err)?;
        tmp.flush().map_err(io_err)?;
        tmp.persist(self.path_for(name))
            .map_err(|e| io_err(e.error))?;
        Ok(())
    }

    #[instrument(skip_all, fields(name = %name))]
    async fn delete(&self, name: &str) -> Result<(), BackendError> {
        match fs::remove_file(self.path_for(name)) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(err)),
        }
    }
}

/// File name for an entry: SHA-256 hex of the name, so any name maps to a fixed-length
/// file name without separators.
fn sanitize_name(name: &str) -> String {
    hex::encode(Sha256::digest(name.as_bytes()))
}

fn io_err<E: ToString>(err: E) -> BackendError {
    BackendError::Io {
        reason: err.to_string(),
    }
}
