//! Byte/string transcoding used by every other layer.
//!
//! Three symmetric pairs:
//!
//! - **hex**: lowercase, two chars per byte (room ids, fingerprints).
//! - **base64**: standard alphabet with padding (ciphertext, nonces, keys, signatures).
//! - **base64url**: RFC 4648 URL-safe alphabet without padding. Only used for values
//!   that travel inside a URL (the room secret key).
//!
//! Decoding never truncates: malformed input is a [`VanishError::Decode`].

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD as B64, URL_SAFE_NO_PAD as B64_URL},
};

use crate::error::VanishResult;

// ============================================================
// Hex
// ============================================================

/// Encode bytes as lowercase hex.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decode hex; fails on odd length or non-hex characters.
pub fn hex_to_bytes(encoded: &str) -> VanishResult<Vec<u8>> {
    Ok(hex::decode(encoded)?)
}

// ============================================================
// Base64
// ============================================================

/// Encode bytes to base64 (standard alphabet, padded).
pub fn bytes_to_base64(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

/// Decode standard padded base64.
pub fn base64_to_bytes(encoded: &str) -> VanishResult<Vec<u8>> {
    Ok(B64.decode(encoded)?)
}

// ============================================================
// Base64url
// ============================================================

/// Encode bytes to URL-safe base64 with the padding stripped.
pub fn bytes_to_base64url(bytes: &[u8]) -> String {
    B64_URL.encode(bytes)
}

/// Decode URL-safe base64. Trailing `=` padding is tolerated so values copied from
/// padded encoders still decode.
pub fn base64url_to_bytes(encoded: &str) -> VanishResult<Vec<u8>> {
    Ok(B64_URL.decode(encoded.trim_end_matches('='))?)
}
