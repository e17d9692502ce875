//! Encryption of TOTP secrets at rest.
//!
//! The shared store holds MFA records for every enrolled subject, so the
//! TOTP secret inside them is encrypted under a server-held AES-256-GCM
//! key. A fresh random nonce is generated per encryption and prepended to
//! the ciphertext; the whole blob is base64 at rest.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{Engine, engine::general_purpose::STANDARD};

const NONCE_LEN: usize = 12;

/// Errors from secret encryption/decryption.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// The encryption key has the wrong length.
    #[error("Cipher key must be 32 bytes, got {got}")]
    BadKeyLength {
        /// Actual key length.
        got: usize,
    },

    /// Encryption failed.
    #[error("Encryption failed")]
    EncryptFailed,

    /// The stored blob could not be decoded or authenticated.
    #[error("Decryption failed: {message}")]
    DecryptFailed {
        /// Description of the failure.
        message: String,
    },
}

/// AES-256-GCM cipher for MFA secrets.
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    /// Creates a cipher from a 32-byte key.
    ///
    /// # Errors
    /// Returns an error if the key is not exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        if key.len() != 32 {
            return Err(CipherError::BadKeyLength { got: key.len() });
        }
        let key = Key::<Aes256Gcm>::from_slice(key);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypts a secret, returning base64(nonce || ciphertext).
    ///
    /// # Errors
    /// Returns an error if encryption fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CipherError::EncryptFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }

    /// Decrypts a blob produced by [`SecretCipher::encrypt`].
    ///
    /// # Errors
    /// Returns an error if the blob is malformed or fails authentication.
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, CipherError> {
        let blob = STANDARD
            .decode(encoded)
            .map_err(|e| CipherError::DecryptFailed {
                message: format!("invalid base64: {e}"),
            })?;
        if blob.len() < NONCE_LEN {
            return Err(CipherError::DecryptFailed {
                message: "blob shorter than nonce".to_string(),
            });
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::DecryptFailed {
                message: "authentication failed".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SecretCipher {
        SecretCipher::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let cipher = cipher();
        let blob = cipher.encrypt(b"totp secret bytes").unwrap();
        assert_eq!(cipher.decrypt(&blob).unwrap(), b"totp secret bytes");
    }

    #[test]
    fn test_nonce_is_fresh_per_encryption() {
        let cipher = cipher();
        let a = cipher.encrypt(b"same plaintext").unwrap();
        let b = cipher.encrypt(b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_rejected() {
        let blob = cipher().encrypt(b"secret").unwrap();
        let other = SecretCipher::new(&[9u8; 32]).unwrap();
        assert!(matches!(
            other.decrypt(&blob),
            Err(CipherError::DecryptFailed { .. })
        ));
    }

    #[test]
    fn test_tampered_blob_rejected() {
        let cipher = cipher();
        let blob = cipher.encrypt(b"secret").unwrap();
        let mut bytes = STANDARD.decode(&blob).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = STANDARD.encode(bytes);
        assert!(matches!(
            cipher.decrypt(&tampered),
            Err(CipherError::DecryptFailed { .. })
        ));
    }

    #[test]
    fn test_bad_key_length() {
        assert!(matches!(
            SecretCipher::new(&[0u8; 16]),
            Err(CipherError::BadKeyLength { got: 16 })
        ));
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let cipher = cipher();
        assert!(cipher.decrypt("AAAA").is_err());
        assert!(cipher.decrypt("not base64 !!!").is_err());
    }
}
