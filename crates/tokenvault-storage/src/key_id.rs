use std::fmt;

use sha2::{Digest, Sha256};

/// Length of a key identifier in hex characters.
pub const KEY_ID_LEN: usize = 10;

/// Namespace for a logical key's encryption key: the first ten hex chars of SHA-256(key).
///
/// Truncation makes collisions between unrelated keys possible; colliding keys share an
/// encryption key, which is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyIdentifier(String);

impl KeyIdentifier {
    pub fn derive(logical_key: &str) -> Self {
        let digest = hex::encode(Sha256::digest(logical_key.as_bytes()));
        Self(digest[..KEY_ID_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
