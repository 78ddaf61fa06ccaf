//! Envelope encryption for gateway credentials and webhook MAC helpers.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};

const BLOB_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;

/// Server-wide secret from which per-context encryption keys are derived.
#[derive(Clone)]
pub struct MasterKey([u8; 32]);

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| AppError::Internal(format!("MASTER_KEY is not valid base64: {}", e)))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AppError::Internal("MASTER_KEY must decode to 32 bytes".into()))?;
        Ok(Self(key))
    }

    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self(key)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    fn cipher(&self, context: &str) -> Result<Aes256Gcm> {
        let hk = Hkdf::<Sha256>::new(None, &self.0);
        let mut okm = [0u8; 32];
        hk.expand(context.as_bytes(), &mut okm)
            .map_err(|_| AppError::Internal("Key derivation failed".into()))?;
        Aes256Gcm::new_from_slice(&okm)
            .map_err(|_| AppError::Internal("Invalid derived key length".into()))
    }

    /// Encrypt `plaintext` under a key bound to `context`.
    /// Layout: version (1) || nonce (12) || ciphertext.
    pub fn encrypt(&self, context: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.cipher(context)?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| AppError::Internal("Encryption failed".into()))?;

        let mut blob = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        blob.push(BLOB_VERSION);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    pub fn decrypt(&self, context: &str, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < 1 + NONCE_LEN || blob[0] != BLOB_VERSION {
            return Err(AppError::Internal("Malformed encrypted blob".into()));
        }
        let (nonce, ciphertext) = blob[1..].split_at(NONCE_LEN);
        self.cipher(context)?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AppError::Internal("Decryption failed (wrong master key?)".into()))
    }
}

pub fn hmac_sha512_hex(secret: &[u8], payload: &[u8]) -> Result<String> {
    let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(secret)
        .map_err(|_| AppError::Internal("Invalid HMAC secret".into()))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}
