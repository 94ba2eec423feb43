use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

use crate::key_store::EncryptionKey;

/// Separates the encoded ciphertext from the plaintext digest. Not part of the base64 alphabet.
pub const RECORD_DELIMITER: char = '|';

/// Marks an AES-256-GCM record. Records without it are legacy repeating-key XOR records.
pub const SEALED_TAG: &str = "v2:";

const NONCE_LEN: usize = 12;

/// Domain label for deriving the record-digest key from the entry key.
const DIGEST_KEY_CONTEXT: &[u8] = b"tokenvault.record-digest.v2\0";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("malformed record: {reason}")]
    Malformed { reason: String },
    #[error("data integrity check failed")]
    IntegrityCheckFailed,
    #[error("seal failed: {reason}")]
    Seal { reason: String },
}

/// Persisted unit in the bulk backend: `<encoded ciphertext>|<plaintext digest hex>`.
///
/// Sealed records carry an HMAC-SHA256 keyed per entry; legacy records a bare SHA-256.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord(String);

impl StoredRecord {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    fn parts(&self) -> Result<(&str, &str), CipherError> {
        self.0
            .split_once(RECORD_DELIMITER)
            .ok_or_else(|| CipherError::Malformed {
                reason: "missing digest delimiter".to_string(),
            })
    }
}

impl From<String> for StoredRecord {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// SHA-256 of `plaintext`, lowercase hex.
pub fn digest(plaintext: &[u8]) -> String {
    hex::encode(Sha256::digest(plaintext))
}

/// HMAC-SHA256 of `plaintext` under a key derived from the entry key, lowercase hex.
///
/// Unlike [`digest`], it cannot be checked against guessed plaintexts without the key.
pub fn keyed_digest(plaintext: &[u8], key: &EncryptionKey) -> Result<String, CipherError> {
    Ok(hex::encode(digest_mac(plaintext, key)?.finalize().into_bytes()))
}

/// Seal `plaintext` with AES-256-GCM under a fresh random nonce.
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> Result<StoredRecord, CipherError> {
    let cipher = build_cipher(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CipherError::Seal {
            reason: e.to_string(),
        })?;

    let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    framed.extend_from_slice(nonce.as_slice());
    framed.extend_from_slice(&ciphertext);

    Ok(StoredRecord(format!(
        "{SEALED_TAG}{}{RECORD_DELIMITER}{}",
        STANDARD.encode(framed),
        keyed_digest(plaintext, key)?
    )))
}

/// Recover the plaintext of `record`, checking it against the stored digest.
pub fn open(record: &StoredRecord, key: &EncryptionKey) -> Result<Vec<u8>, CipherError> {
    let (body, expected) = record.parts()?;
    match body.strip_prefix(SEALED_TAG) {
        Some(sealed) => {
            let plaintext = open_sealed(sealed, key)?;
            let expected = hex::decode(expected).map_err(|_| CipherError::IntegrityCheckFailed)?;
            digest_mac(&plaintext, key)?
                .verify_slice(&expected)
                .map_err(|_| CipherError::IntegrityCheckFailed)?;
            Ok(plaintext)
        }
        None => {
            let plaintext = open_legacy(body, key)?;
            if digest(&plaintext) != expected {
                return Err(CipherError::IntegrityCheckFailed);
            }
            Ok(plaintext)
        }
    }
}

/// Like [`open`], but any failure is logged and reported as "no value".
pub fn decrypt(record: &StoredRecord, key: &EncryptionKey) -> Option<Vec<u8>> {
    match open(record, key) {
        Ok(plaintext) => Some(plaintext),
        Err(err) => {
            warn!(%err, "discarding undecryptable record");
            None
        }
    }
}

fn open_sealed(encoded: &str, key: &EncryptionKey) -> Result<Vec<u8>, CipherError> {
    let framed = decode(encoded)?;
    if framed.len() < NONCE_LEN {
        return Err(CipherError::Malformed {
            reason: format!("sealed payload shorter than {NONCE_LEN}-byte nonce"),
        });
    }

    let (nonce, ciphertext) = framed.split_at(NONCE_LEN);
    build_cipher(key)?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CipherError::IntegrityCheckFailed)
}

fn open_legacy(encoded: &str, key: &EncryptionKey) -> Result<Vec<u8>, CipherError> {
    Ok(xor_with_key(&decode(encoded)?, key))
}

/// Repeating-key XOR used by records written before AES-GCM. Read path only.
fn xor_with_key(data: &[u8], key: &EncryptionKey) -> Vec<u8> {
    data.iter()
        .zip(key.as_bytes().iter().cycle())
        .map(|(byte, k)| byte ^ k)
        .collect()
}

fn digest_mac(plaintext: &[u8], key: &EncryptionKey) -> Result<HmacSha256, CipherError> {
    let digest_key = Sha256::new()
        .chain_update(DIGEST_KEY_CONTEXT)
        .chain_update(key.as_bytes())
        .finalize();
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(&digest_key).map_err(|e| CipherError::Seal {
            reason: format!("digest init failed: {e}"),
        })?;
    mac.update(plaintext);
    Ok(mac)
}

fn decode(encoded: &str) -> Result<Vec<u8>, CipherError> {
    STANDARD.decode(encoded).map_err(|e| CipherError::Malformed {
        reason: format!("ciphertext decode failed: {e}"),
    })
}

fn build_cipher(key: &EncryptionKey) -> Result<Aes256Gcm, CipherError> {
    Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|e| CipherError::Seal {
        reason: format!("cipher init failed: {e}"),
    })
}
