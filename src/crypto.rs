//! Envelope encryption for secrets stored in the database, and stable hashing
//! for identifiers we hand to third parties.
//!
//! Ciphertext layout: `nonce (12 bytes) || AES-256-GCM ciphertext+tag`.
//! Each purpose gets its own subkey derived from the master key with HKDF-SHA256,
//! so a key leaked for one column cannot decrypt another.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};

pub const BILLING_KEY_PURPOSE: &str = "premium-billing/billing-key/v1";

const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct MasterKey {
    key: [u8; 32],
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

impl MasterKey {
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Parse a base64-encoded 32-byte key (the `MASTER_KEY` env var format).
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| AppError::Internal("MASTER_KEY is not valid base64".into()))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AppError::Internal("MASTER_KEY must decode to 32 bytes".into()))?;
        Ok(Self { key })
    }

    pub fn generate() -> Self {
        Self {
            key: rand::random(),
        }
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.key)
    }

    fn cipher_for(&self, purpose: &str) -> Result<Aes256Gcm> {
        let hk = Hkdf::<Sha256>::new(None, &self.key);
        let mut subkey = [0u8; 32];
        hk.expand(purpose.as_bytes(), &mut subkey)
            .map_err(|_| AppError::Internal("Key derivation failed".into()))?;
        Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&subkey)))
    }

    pub fn encrypt(&self, purpose: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.cipher_for(purpose)?;
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| AppError::Internal("Encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, purpose: &str, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() <= NONCE_LEN {
            return Err(AppError::Internal("Ciphertext too short".into()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher_for(purpose)?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AppError::Internal("Decryption failed".into()))
    }
}

/// SHA-256 hex of a domain-separated value.
pub fn hash_secret(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"premium-billing-v1:");
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Opaque, stable gateway customer key for a user.
/// The gateway never sees our user ids.
pub fn customer_key_for(user_id: &str) -> String {
    format!("cus_{}", &hash_secret(user_id)[..40])
}
