//! Encryption of data stored at rest.
//!
//! Ciphertexts are bound to the row they are stored in through AES-GCM
//! associated data, so a value copied into another row fails to open.

use std::sync::Arc;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::RngCore;

use crate::error::{GitlinkError, Result};

/// Environment variable holding the key.
pub const ENCRYPTION_KEY_VAR: &str = "ENCRYPTION_KEY";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Table and primary key a ciphertext belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowBinding<'a> {
    pub table: &'a str,
    pub row_id: &'a str,
}

impl<'a> RowBinding<'a> {
    pub fn new(table: &'a str, row_id: &'a str) -> Self {
        Self { table, row_id }
    }

    fn aad(&self) -> String {
        format!("{}:{}", self.table, self.row_id)
    }
}

/// Ciphertext together with the nonce it was sealed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// AES-256-GCM key, accepted as 64 hex characters or base64.
#[derive(Clone)]
pub struct EncryptionKey(Arc<[u8; KEY_LEN]>);

impl EncryptionKey {
    /// Loads the key from `ENCRYPTION_KEY`.
    pub fn from_env() -> Result<Self> {
        let encoded = std::env::var(ENCRYPTION_KEY_VAR).map_err(|_| {
            GitlinkError::Configuration(format!(
                "{} environment variable is required",
                ENCRYPTION_KEY_VAR
            ))
        })?;

        Self::from_string(encoded.trim())
    }

    pub fn from_string(encoded: &str) -> Result<Self> {
        let bytes = if encoded.len() == KEY_LEN * 2 && encoded.bytes().all(|b| b.is_ascii_hexdigit()) {
            hex::decode(encoded)
                .map_err(|e| GitlinkError::Configuration(format!("Invalid hex key: {}", e)))?
        } else {
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)
                .map_err(|e| GitlinkError::Configuration(format!("Invalid base64 key: {}", e)))?
        };

        let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            GitlinkError::Configuration(format!(
                "Encryption key must be exactly {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;

        Ok(Self(Arc::new(key)))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.0.as_slice()))
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8], binding: RowBinding<'_>) -> Result<Sealed> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let aad = binding.aad();
        let ciphertext = self
            .cipher()
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|e| GitlinkError::Encryption(format!("Encryption failed: {}", e)))?;

        Ok(Sealed {
            ciphertext,
            nonce: nonce.to_vec(),
        })
    }

    /// Decrypts a value sealed for the same row.
    pub fn open(&self, ciphertext: &[u8], nonce: &[u8], binding: RowBinding<'_>) -> Result<Vec<u8>> {
        if nonce.len() != NONCE_LEN {
            return Err(GitlinkError::Encryption(format!(
                "Invalid nonce length: {}",
                nonce.len()
            )));
        }

        let aad = binding.aad();
        self.cipher()
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|e| GitlinkError::Encryption(format!("Decryption failed: {}", e)))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "K7gNU3sdo+OL0wNhqoVWhr3g6s1xYv72ol/pe/Unols=";
    const TEST_KEY_HEX: &str = "2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b";

    fn key() -> EncryptionKey {
        EncryptionKey::from_string(TEST_KEY).unwrap()
    }

    #[test]
    fn test_key_encodings() {
        let from_b64 = EncryptionKey::from_string(TEST_KEY).unwrap();
        let from_hex = EncryptionKey::from_string(TEST_KEY_HEX).unwrap();
        assert_eq!(from_b64.0, from_hex.0);

        assert!(EncryptionKey::from_string("tooshort").is_err());
        assert!(EncryptionKey::from_string("AAAA").is_err());
        assert_eq!(format!("{:?}", from_hex), "EncryptionKey([REDACTED])");
    }

    #[test]
    fn test_key_from_env() {
        temp_env::with_var(ENCRYPTION_KEY_VAR, Some(format!("{}\n", TEST_KEY)), || {
            assert!(EncryptionKey::from_env().is_ok());
        });
        temp_env::with_var_unset(ENCRYPTION_KEY_VAR, || {
            let err = EncryptionKey::from_env().unwrap_err();
            assert!(err.to_string().contains(ENCRYPTION_KEY_VAR));
        });
    }

    #[test]
    fn test_seal_and_open() {
        let binding = RowBinding::new("setup_sessions", "abc");
        let sealed = key().seal(b"client secret", binding).unwrap();
        assert_eq!(sealed.nonce.len(), NONCE_LEN);
        assert_ne!(sealed.ciphertext, b"client secret");

        let opened = key().open(&sealed.ciphertext, &sealed.nonce, binding).unwrap();
        assert_eq!(opened, b"client secret");

        let again = key().seal(b"client secret", binding).unwrap();
        assert_ne!(again.nonce, sealed.nonce);
    }

    #[test]
    fn test_open_rejects_other_row_or_key() {
        let sealed = key()
            .seal(b"client secret", RowBinding::new("setup_sessions", "abc"))
            .unwrap();

        let other_row = RowBinding::new("setup_sessions", "xyz");
        assert!(key().open(&sealed.ciphertext, &sealed.nonce, other_row).is_err());

        let other_table = RowBinding::new("integrations", "abc");
        assert!(key().open(&sealed.ciphertext, &sealed.nonce, other_table).is_err());

        let binding = RowBinding::new("setup_sessions", "abc");
        let other_key = EncryptionKey::from_string(&"00".repeat(KEY_LEN)).unwrap();
        assert!(other_key.open(&sealed.ciphertext, &sealed.nonce, binding).is_err());
        assert!(key().open(&sealed.ciphertext, &sealed.nonce[..8], binding).is_err());
    }
}
