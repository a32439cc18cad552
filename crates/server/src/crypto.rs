//! Access token encryption at rest.
//!
//! Tokens are sealed with AES-256-GCM under `APP_KEY` and stored as
//! `base64(nonce_12bytes || ciphertext || tag_16bytes)`. An empty token stays
//! empty in both directions so uninstalled shops keep an empty column.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Errors from sealing or opening a token.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption key must be base64 for {KEY_LEN} bytes")]
    InvalidKey,
    #[error("ciphertext is not valid base64")]
    InvalidEncoding,
    #[error("ciphertext too short")]
    Truncated,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed (wrong key or tampered data)")]
    Decrypt,
    #[error("decrypted token is not UTF-8")]
    NotUtf8,
}

/// Symmetric cipher for shop access tokens.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl TokenCipher {
    /// Build a cipher from a base64-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns `CipherError::InvalidKey` if the key is not base64 or not 32 bytes.
    pub fn from_base64_key(key: &SecretString) -> Result<Self, CipherError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(key.expose_secret().trim())
            .map_err(|_| CipherError::InvalidKey)?;

        if bytes.len() != KEY_LEN {
            return Err(CipherError::InvalidKey);
        }

        let cipher = Aes256Gcm::new_from_slice(&bytes).map_err(|_| CipherError::InvalidKey)?;
        Ok(Self { cipher })
    }

    /// Seal a token for storage.
    ///
    /// # Errors
    ///
    /// Returns `CipherError::Encrypt` if the AEAD operation fails.
    pub fn encrypt(&self, token: &SecretString) -> Result<String, CipherError> {
        let plaintext = token.expose_secret();
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::RngCore::fill_bytes(&mut rand::rng(), &mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&sealed))
    }

    /// Open a stored token.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not valid base64, is truncated, was
    /// sealed under another key, or was tampered with.
    pub fn decrypt(&self, stored: &str) -> Result<SecretString, CipherError> {
        if stored.is_empty() {
            return Ok(SecretString::from(String::new()));
        }

        let data = base64::engine::general_purpose::STANDARD
            .decode(stored)
            .map_err(|_| CipherError::InvalidEncoding)?;

        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Truncated);
        }

        let (nonce_bytes, ciphertext) = data
            .split_at_checked(NONCE_LEN)
            .ok_or(CipherError::Truncated)?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CipherError::Decrypt)?;

        String::from_utf8(plaintext)
            .map(SecretString::from)
            .map_err(|_| CipherError::NotUtf8)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn key(byte: u8) -> SecretString {
        SecretString::from(base64::engine::general_purpose::STANDARD.encode([byte; KEY_LEN]))
    }

    #[test]
    fn test_encrypt_then_decrypt() {
        let cipher = TokenCipher::from_base64_key(&key(3)).unwrap();
        let sealed = cipher
            .encrypt(&SecretString::from("shpat_0123456789abcdef"))
            .unwrap();

        assert!(!sealed.contains("shpat_"));
        let opened = cipher.decrypt(&sealed).unwrap();
        assert_eq!(opened.expose_secret(), "shpat_0123456789abcdef");
    }

    #[test]
    fn test_nonce_is_fresh_per_call() {
        let cipher = TokenCipher::from_base64_key(&key(3)).unwrap();
        let token = SecretString::from("shpat_same");
        assert_ne!(
            cipher.encrypt(&token).unwrap(),
            cipher.encrypt(&token).unwrap()
        );
    }

    #[test]
    fn test_empty_stays_empty() {
        let cipher = TokenCipher::from_base64_key(&key(3)).unwrap();
        assert_eq!(cipher.encrypt(&SecretString::from("")).unwrap(), "");
        assert_eq!(cipher.decrypt("").unwrap().expose_secret(), "");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = TokenCipher::from_base64_key(&key(3))
            .unwrap()
            .encrypt(&SecretString::from("shpat_abc"))
            .unwrap();
        let other = TokenCipher::from_base64_key(&key(4)).unwrap();

        assert!(matches!(other.decrypt(&sealed), Err(CipherError::Decrypt)));
    }

    #[test]
    fn test_garbage_input() {
        let cipher = TokenCipher::from_base64_key(&key(3)).unwrap();
        assert!(matches!(
            cipher.decrypt("not base64!"),
            Err(CipherError::InvalidEncoding)
        ));
        assert!(matches!(cipher.decrypt("AAAA"), Err(CipherError::Truncated)));
    }

    #[test]
    fn test_invalid_key() {
        let short = SecretString::from(base64::engine::general_purpose::STANDARD.encode([1u8; 8]));
        assert!(matches!(
            TokenCipher::from_base64_key(&short),
            Err(CipherError::InvalidKey)
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let cipher = TokenCipher::from_base64_key(&key(3)).unwrap();
        assert!(format!("{cipher:?}").contains("[REDACTED]"));
    }
}
