//! Sender identity: one ECDSA P-256 key pair per installation.
//!
//! Identity is self-asserted per message. Each signed payload carries the author's
//! public key inline and a signature over `sender:content`; there is no membership
//! list to pin keys against. The short [`fingerprint`] lets humans eyeball-compare
//! keys and is not a security boundary (2 bytes, ~1/65536 collisions).
//!
//! # Lifecycle
//! [`IdentityManager::get_or_create`] reads the [`KeyStore`] once. If nothing is
//! stored it generates a pair and persists it before returning. The pair is cached
//! for the life of the manager and only [`IdentityManager::reset`] discards it.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use vanish_common::codec;
use vanish_common::models::{IdentityKeyPair, MessageType, Payload, PlaintextMessage};
use vanish_common::{VanishError, VanishResult};

use crate::backend::CryptoBackend;
use crate::keystore::KeyStore;

/// Bytes of the SHA-256 digest kept for the fingerprint.
const FINGERPRINT_BYTES: usize = 2;

// ─── Manager ─────────────────────────────────────────────────────────────────

pub struct IdentityManager {
    backend: Arc<dyn CryptoBackend>,
    store: Arc<dyn KeyStore>,
    cached: Mutex<Option<IdentityKeyPair>>,
}

impl IdentityManager {
    pub fn new(backend: Arc<dyn CryptoBackend>, store: Arc<dyn KeyStore>) -> Self {
        Self { backend, store, cached: Mutex::new(None) }
    }

    /// Return the installation's key pair, creating and persisting one on first use.
    pub async fn get_or_create(&self) -> VanishResult<IdentityKeyPair> {
        let mut cached = self.cached.lock().await;
        if let Some(pair) = cached.as_ref() {
            return Ok(pair.clone());
        }

        if let Some(pair) = self.store.load().await? {
            self.check_consistent(&pair)?;
            debug!(fingerprint = %fingerprint(self.backend.as_ref(), &pair.public_key)?, "Loaded identity");
            *cached = Some(pair.clone());
            return Ok(pair);
        }

        warn!("No stored identity, generating a new P-256 key pair");
        let pair = generate_identity(self.backend.as_ref())?;
        self.store.save(&pair).await?;
        info!(fingerprint = %fingerprint(self.backend.as_ref(), &pair.public_key)?, "Generated and persisted new identity");

        *cached = Some(pair.clone());
        Ok(pair)
    }

    /// Delete the persisted pair. The next `get_or_create` generates a new identity.
    pub async fn reset(&self) -> VanishResult<()> {
        let mut cached = self.cached.lock().await;
        self.store.delete().await?;
        *cached = None;
        info!("Identity deleted");
        Ok(())
    }

    pub fn backend(&self) -> &Arc<dyn CryptoBackend> {
        &self.backend
    }

    /// A stored file whose halves do not belong together is refused rather than
    /// silently producing unverifiable signatures.
    fn check_consistent(&self, pair: &IdentityKeyPair) -> VanishResult<()> {
        let private = zeroize::Zeroizing::new(codec::base64_to_bytes(&pair.private_key)?);
        let derived = self.backend.public_key_for(&private)?;
        if codec::bytes_to_base64(&derived) != pair.public_key {
            return Err(VanishError::KeyStore(
                "stored public key does not match stored private key".into(),
            ));
        }
        Ok(())
    }
}

// ─── Operations ──────────────────────────────────────────────────────────────

/// Generate a fresh key pair without persisting it.
pub fn generate_identity(backend: &dyn CryptoBackend) -> VanishResult<IdentityKeyPair> {
    let material = backend.generate_signing_key()?;
    Ok(IdentityKeyPair {
        public_key: codec::bytes_to_base64(&material.public_spki),
        private_key: codec::bytes_to_base64(&material.private_pkcs8),
    })
}

/// First two bytes of SHA-256 over the decoded public key, as 4 lowercase hex chars.
pub fn fingerprint(backend: &dyn CryptoBackend, public_key: &str) -> VanishResult<String> {
    let raw = codec::base64_to_bytes(public_key)?;
    let digest = backend.sha256(&raw);
    Ok(codec::bytes_to_hex(&digest[..FINGERPRINT_BYTES]))
}

/// Build a payload signed over `sender:content`, carrying the signer's public key.
pub fn sign_payload(
    backend: &dyn CryptoBackend,
    identity: &IdentityKeyPair,
    sender: &str,
    content: &str,
    kind: MessageType,
) -> VanishResult<Payload> {
    let private = zeroize::Zeroizing::new(codec::base64_to_bytes(&identity.private_key)?);
    let signature = backend.sign(&private, Payload::signing_input(sender, content).as_bytes())?;

    Ok(Payload {
        public_key: Some(identity.public_key.clone()),
        signature: Some(codec::bytes_to_base64(&signature)),
        ..Payload::new(sender, content, kind)
    })
}

/// Turn a decrypted payload into a deliverable message.
///
/// Never fails. A payload without both `publicKey` and `signature` is delivered
/// unverified with no fingerprint; a bad signature is delivered with
/// `verified: false` and the fingerprint of the key it claimed.
pub fn verify_payload(
    backend: &dyn CryptoBackend,
    payload: Payload,
    message_id: &str,
    timestamp: i64,
) -> PlaintextMessage {
    let (public_key, fingerprint, verified) = match payload.signature_parts() {
        Some((public_key, signature)) => {
            let verified = check_signature(backend, &payload, public_key, signature);
            let fp = fingerprint(backend, public_key).ok();
            (Some(public_key.to_owned()), fp, verified)
        }
        None => (None, None, false),
    };

    PlaintextMessage {
        id: message_id.to_owned(),
        sender: payload.sender,
        content: payload.content,
        timestamp,
        kind: payload.kind,
        public_key,
        fingerprint,
        verified,
    }
}

fn check_signature(
    backend: &dyn CryptoBackend,
    payload: &Payload,
    public_key: &str,
    signature: &str,
) -> bool {
    let (Ok(public), Ok(signature)) =
        (codec::base64_to_bytes(public_key), codec::base64_to_bytes(signature))
    else {
        return false;
    };
    let input = Payload::signing_input(&payload.sender, &payload.content);
    backend.verify(&public, input.as_bytes(), &signature)
}
