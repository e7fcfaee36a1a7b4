//! Injected cryptography capability.
//!
//! Protocol code (cipher, identity, session) never touches a primitive crate
//! directly; it goes through [`CryptoBackend`]. [`RustCrypto`] is the one shipped
//! implementation:
//!
//! | capability | algorithm |
//! |---|---|
//! | random bytes | OS CSPRNG (`getrandom`) |
//! | AEAD | AES-256-GCM, 96-bit nonce, 128-bit tag appended to ciphertext |
//! | signatures | ECDSA P-256 / SHA-256, 64-byte `r ‖ s` encoding |
//! | key encoding | SPKI DER (public), PKCS#8 DER (private) |
//! | digest | SHA-256 |

use std::sync::Arc;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use p256::ecdsa::{
    Signature, SigningKey, VerifyingKey,
    signature::{Signer as _, Verifier as _},
};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use vanish_common::models::SecretKey;
use vanish_common::{VanishError, VanishResult};

/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;
/// AES-GCM authentication tag length.
pub const TAG_LEN: usize = 16;

// A uniformly random 32-byte string is a valid P-256 scalar with overwhelming
// probability; this bounds the retry loop anyway.
const MAX_KEYGEN_ATTEMPTS: usize = 8;

/// Freshly generated signing key, DER-encoded.
pub struct SigningKeyMaterial {
    pub private_pkcs8: Zeroizing<Vec<u8>>,
    pub public_spki: Vec<u8>,
}

/// Everything the protocol needs from a cryptography provider.
pub trait CryptoBackend: Send + Sync {
    /// Fill `buf` from a cryptographically secure source.
    fn fill_random(&self, buf: &mut [u8]) -> VanishResult<()>;

    /// Authenticated encryption; returns ciphertext with the tag appended.
    fn aead_seal(
        &self,
        key: &SecretKey,
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
    ) -> VanishResult<Vec<u8>>;

    /// Authenticated decryption. Any failure is [`VanishError::Decryption`].
    fn aead_open(
        &self,
        key: &SecretKey,
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
    ) -> VanishResult<Zeroizing<Vec<u8>>>;

    fn generate_signing_key(&self) -> VanishResult<SigningKeyMaterial>;

    /// Derive the SPKI public key belonging to a PKCS#8 private key.
    fn public_key_for(&self, private_pkcs8: &[u8]) -> VanishResult<Vec<u8>>;

    fn sign(&self, private_pkcs8: &[u8], message: &[u8]) -> VanishResult<Vec<u8>>;

    /// Never errors: malformed keys or signatures simply do not verify.
    fn verify(&self, public_spki: &[u8], message: &[u8], signature: &[u8]) -> bool;

    fn sha256(&self, data: &[u8]) -> [u8; 32];
}

/// The backend built on the RustCrypto crates.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustCrypto;

/// Shared handle to the default backend.
pub fn default_backend() -> Arc<dyn CryptoBackend> {
    Arc::new(RustCrypto)
}

impl CryptoBackend for RustCrypto {
    fn fill_random(&self, buf: &mut [u8]) -> VanishResult<()> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| VanishError::RandomSource(e.to_string()))
    }

    fn aead_seal(
        &self,
        key: &SecretKey,
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
    ) -> VanishResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|_| VanishError::InvalidKey("AES-256 key must be 32 bytes".into()))?;
        cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|_| VanishError::InvalidKey("AES-GCM encryption failed".into()))
    }

    fn aead_open(
        &self,
        key: &SecretKey,
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
    ) -> VanishResult<Zeroizing<Vec<u8>>> {
        let cipher =
            Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| VanishError::Decryption)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| VanishError::Decryption)?;
        Ok(Zeroizing::new(plaintext))
    }

    fn generate_signing_key(&self) -> VanishResult<SigningKeyMaterial> {
        let mut seed = Zeroizing::new([0u8; 32]);
        for _ in 0..MAX_KEYGEN_ATTEMPTS {
            self.fill_random(&mut seed[..])?;
            let Ok(signing_key) = SigningKey::from_slice(&seed[..]) else {
                continue;
            };
            let private = signing_key
                .to_pkcs8_der()
                .map_err(|e| VanishError::InvalidKey(format!("PKCS#8 encoding: {e}")))?;
            let public = signing_key
                .verifying_key()
                .to_public_key_der()
                .map_err(|e| VanishError::InvalidKey(format!("SPKI encoding: {e}")))?;
            return Ok(SigningKeyMaterial {
                private_pkcs8: Zeroizing::new(private.as_bytes().to_vec()),
                public_spki: public.as_bytes().to_vec(),
            });
        }
        Err(VanishError::RandomSource("could not draw a valid P-256 scalar".into()))
    }

    fn public_key_for(&self, private_pkcs8: &[u8]) -> VanishResult<Vec<u8>> {
        let signing_key = load_signing_key(private_pkcs8)?;
        let public = signing_key
            .verifying_key()
            .to_public_key_der()
            .map_err(|e| VanishError::InvalidKey(format!("SPKI encoding: {e}")))?;
        Ok(public.as_bytes().to_vec())
    }

    fn sign(&self, private_pkcs8: &[u8], message: &[u8]) -> VanishResult<Vec<u8>> {
        let signing_key = load_signing_key(private_pkcs8)?;
        let signature: Signature = signing_key.sign(message);
        Ok(signature.to_bytes().to_vec())
    }

    fn verify(&self, public_spki: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_public_key_der(public_spki) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(message, &signature).is_ok()
    }

    fn sha256(&self, data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }
}

fn load_signing_key(private_pkcs8: &[u8]) -> VanishResult<SigningKey> {
    SigningKey::from_pkcs8_der(private_pkcs8)
        .map_err(|e| VanishError::InvalidKey(format!("PKCS#8 decoding: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_draws_differ() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        RustCrypto.fill_random(&mut a).unwrap();
        RustCrypto.fill_random(&mut b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn seal_open_round_trip_and_tag_length() {
        let key = SecretKey::from_bytes([3u8; 32]);
        let nonce = [1u8; NONCE_LEN];
        let sealed = RustCrypto.aead_seal(&key, &nonce, b"hello").unwrap();
        assert_eq!(sealed.len(), 5 + TAG_LEN);
        let opened = RustCrypto.aead_open(&key, &nonce, &sealed).unwrap();
        assert_eq!(opened.as_slice(), b"hello");
    }

    #[test]
    fn open_fails_on_wrong_nonce() {
        let key = SecretKey::from_bytes([3u8; 32]);
        let sealed = RustCrypto.aead_seal(&key, &[1u8; NONCE_LEN], b"hello").unwrap();
        let res = RustCrypto.aead_open(&key, &[2u8; NONCE_LEN], &sealed);
        assert!(matches!(res, Err(VanishError::Decryption)));
    }

    #[test]
    fn sign_verify_and_derive_public() {
        let material = RustCrypto.generate_signing_key().unwrap();
        let sig = RustCrypto.sign(&material.private_pkcs8, b"Alice:hi").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(RustCrypto.verify(&material.public_spki, b"Alice:hi", &sig));
        assert!(!RustCrypto.verify(&material.public_spki, b"Alice:hj", &sig));
        assert!(!RustCrypto.verify(b"not a key", b"Alice:hi", &sig));
        assert!(!RustCrypto.verify(&material.public_spki, b"Alice:hi", &sig[..10]));

        let derived = RustCrypto.public_key_for(&material.private_pkcs8).unwrap();
        assert_eq!(derived, material.public_spki);
    }

    #[test]
    fn sha256_known_vector() {
        let digest = RustCrypto.sha256(b"abc");
        assert_eq!(
            vanish_common::codec::bytes_to_hex(&digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
