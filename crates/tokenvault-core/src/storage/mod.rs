mod backend;

pub use backend::{BackendError, InMemoryBackend, KeyValueBackend};
