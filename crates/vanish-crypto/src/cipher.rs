//! Payload encryption under a room's secret key.
//!
//! Wire format: the payload's JSON bytes sealed with AES-256-GCM; the nonce and the
//! ciphertext (tag appended) are base64-encoded separately into an
//! [`EncryptedPayload`]. A fresh nonce is drawn for every call and there is no way
//! to pass one in.

use std::sync::Arc;

use tracing::debug;

use vanish_common::codec;
use vanish_common::models::{EncryptedPayload, Payload, SecretKey};
use vanish_common::{VanishError, VanishResult};

use crate::backend::{CryptoBackend, NONCE_LEN, default_backend};

/// Encrypts and decrypts payloads for exactly one room key.
///
/// Holding the key here is the per-room cache: a cipher is never shared between rooms.
pub struct PayloadCipher {
    backend: Arc<dyn CryptoBackend>,
    key: SecretKey,
}

impl PayloadCipher {
    pub fn new(backend: Arc<dyn CryptoBackend>, key: SecretKey) -> Self {
        Self { backend, key }
    }

    pub fn encrypt(&self, payload: &Payload) -> VanishResult<EncryptedPayload> {
        let plaintext = zeroize::Zeroizing::new(serde_json::to_vec(payload)?);

        let mut nonce = [0u8; NONCE_LEN];
        self.backend.fill_random(&mut nonce)?;

        let sealed = self.backend.aead_seal(&self.key, &nonce, &plaintext)?;
        Ok(EncryptedPayload {
            ciphertext: codec::bytes_to_base64(&sealed),
            iv: codec::bytes_to_base64(&nonce),
        })
    }

    /// Wrong key and tampering both surface as [`VanishError::Decryption`];
    /// malformed base64 or JSON is a [`VanishError::Decode`].
    pub fn decrypt(&self, encrypted: &EncryptedPayload) -> VanishResult<Payload> {
        let ciphertext = codec::base64_to_bytes(&encrypted.ciphertext)?;
        let iv = codec::base64_to_bytes(&encrypted.iv)?;
        let nonce: [u8; NONCE_LEN] = iv.as_slice().try_into().map_err(|_| {
            debug!(len = iv.len(), "rejecting nonce of wrong length");
            VanishError::Decryption
        })?;

        let plaintext = self.backend.aead_open(&self.key, &nonce, &ciphertext)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

/// One-shot encryption with the default backend.
pub fn encrypt(payload: &Payload, secret_key: &SecretKey) -> VanishResult<EncryptedPayload> {
    PayloadCipher::new(default_backend(), secret_key.clone()).encrypt(payload)
}

/// One-shot decryption with the default backend.
pub fn decrypt(ciphertext: &str, iv: &str, secret_key: &SecretKey) -> VanishResult<Payload> {
    let encrypted = EncryptedPayload { ciphertext: ciphertext.to_owned(), iv: iv.to_owned() };
    PayloadCipher::new(default_backend(), secret_key.clone()).decrypt(&encrypted)
}
