//! AES-256-GCM encryption for OAuth tokens at rest.
//!
//! Ciphertext layout: `base64(nonce[12] || ciphertext || tag[16])`.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{AppError, AppResult};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

impl TokenCipher {
    /// Build from a base64-encoded 32-byte key.
    pub fn from_base64(key: &SecretString) -> AppResult<Self> {
        let bytes = STANDARD
            .decode(key.expose_secret().trim())
            .map_err(|e| AppError::Crypto(format!("encryption key is not valid base64: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(key: &[u8]) -> AppResult<Self> {
        if key.len() != KEY_LEN {
            return Err(AppError::Crypto(format!(
                "encryption key must be {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| AppError::Crypto(format!("invalid encryption key: {}", e)))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> AppResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| AppError::Crypto("encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> AppResult<SecretString> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| AppError::Crypto(format!("ciphertext is not valid base64: {}", e)))?;
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(AppError::Crypto("ciphertext too short".to_string()));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AppError::Crypto("decryption failed".to_string()))?;

        let token = String::from_utf8(plaintext)
            .map_err(|_| AppError::Crypto("decrypted token is not UTF-8".to_string()))?;
        Ok(SecretString::from(token))
    }
}
