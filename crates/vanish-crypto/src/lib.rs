//! # vanish-crypto
//!
//! Everything that touches key material on the client: room credential generation,
//! the AES-256-GCM payload cipher, and the ECDSA P-256 signing identity with its
//! persistent key store. The server never sees any of it.

pub mod backend;
pub mod cipher;
pub mod credentials;
pub mod identity;
pub mod keystore;

pub use backend::{CryptoBackend, RustCrypto, default_backend};
pub use cipher::PayloadCipher;
pub use credentials::generate_credentials;
pub use identity::{IdentityManager, fingerprint, sign_payload, verify_payload};
pub use keystore::{FileKeyStore, KeyStore, MemoryKeyStore};
