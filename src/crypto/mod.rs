//! Token encryption at rest.
//!
//! OAuth access and refresh tokens are never persisted in plaintext. Each
//! token is encrypted with AES-256-GCM under a key derived from the server
//! secret, using a fresh random nonce per call. The stored form is a single
//! `nonce:ciphertext` string (both halves base64).
//!
//! There is no key rotation or version tag: changing
//! `GROWTHD_ENCRYPTION_SECRET` invalidates every stored token.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};

/// Size of the GCM nonce in bytes (96 bits)
const NONCE_SIZE: usize = 12;

/// Symmetric cipher for OAuth tokens.
#[derive(Clone)]
pub struct TokenCipher {
    key: [u8; 32],
}

impl TokenCipher {
    /// Derives a fixed 256-bit key from the server secret.
    ///
    /// The secret can be any non-empty string; SHA-256 maps it onto the
    /// exact key size AES-256 requires.
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(anyhow!("Encryption secret must not be empty"));
        }
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Ok(Self { key })
    }

    /// Encrypts a token for storage.
    ///
    /// Returns `nonce_b64:ciphertext_b64`. A fresh random nonce is generated
    /// on every call, so encrypting the same plaintext twice yields different
    /// outputs.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        Ok(format!("{}:{}", BASE64.encode(nonce), BASE64.encode(ciphertext)))
    }

    /// Decrypts a stored `nonce:ciphertext` string.
    ///
    /// Fails on malformed input (missing `:` separator, bad base64, wrong
    /// nonce size) and on any tampered or wrong-key ciphertext — GCM is
    /// authenticated, so corruption is detected rather than returning
    /// garbage.
    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let (nonce_b64, ciphertext_b64) = stored
            .split_once(':')
            .ok_or_else(|| anyhow!("Malformed encrypted token: missing ':' separator"))?;

        let nonce_bytes = BASE64
            .decode(nonce_b64)
            .context("Failed to decode token nonce")?;
        let ciphertext = BASE64
            .decode(ciphertext_b64)
            .context("Failed to decode token ciphertext")?;

        if nonce_bytes.len() != NONCE_SIZE {
            return Err(anyhow!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

        String::from_utf8(plaintext).context("Decrypted token is not valid UTF-8")
    }
}
