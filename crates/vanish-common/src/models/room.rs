//! Room credentials and the storage service's room/message records.
//!
//! A room is addressed by a public [`RoomId`] and secured by a [`SecretKey`] that
//! only ever travels inside a URL fragment. The storage service sees the id, the
//! encrypted blobs, and nothing else.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::codec;
use crate::error::{VanishError, VanishResult};
use crate::models::EncryptedPayload;

/// Raw length of a room id.
pub const ROOM_ID_LEN: usize = 16;
/// Raw length of a room secret key (AES-256).
pub const SECRET_KEY_LEN: usize = 32;

// ============================================================
// Room id
// ============================================================

/// 128-bit room identifier rendered as 32 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn from_bytes(bytes: [u8; ROOM_ID_LEN]) -> Self {
        Self(codec::bytes_to_hex(&bytes))
    }

    /// Accepts exactly 32 lowercase hex characters.
    pub fn parse(s: &str) -> VanishResult<Self> {
        let well_formed = s.len() == ROOM_ID_LEN * 2
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(VanishError::Decode(format!(
                "room id must be {} lowercase hex chars",
                ROOM_ID_LEN * 2
            )));
        }
        Ok(Self(s.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomId {
    type Error = VanishError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

// ============================================================
// Secret key
// ============================================================

/// 256-bit symmetric room key. Zeroized on drop; never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; SECRET_KEY_LEN]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; SECRET_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode the URL-safe base64 form carried in share links.
    pub fn from_base64url(encoded: &str) -> VanishResult<Self> {
        let bytes = codec::base64url_to_bytes(encoded)?;
        let arr: [u8; SECRET_KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            VanishError::InvalidKey(format!(
                "secret key must be {SECRET_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn to_base64url(&self) -> String {
        codec::bytes_to_base64url(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// The pair that identifies and unlocks one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub room_id: RoomId,
    pub secret_key: SecretKey,
}

// ============================================================
// Storage service records
// ============================================================

/// Room metadata as reported by the storage service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_id: RoomId,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds after which the service deletes the room.
    pub expires_at: i64,
    #[serde(default)]
    pub message_count: u64,
}

/// One encrypted message as stored by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub ciphertext: String,
    pub iv: String,
    /// Server-assigned epoch milliseconds; not unique.
    pub timestamp: i64,
}

impl StoredMessage {
    pub fn encrypted(&self) -> EncryptedPayload {
        EncryptedPayload { ciphertext: self.ciphertext.clone(), iv: self.iv.clone() }
    }
}

/// Response to a `getMessages` call: ascending by timestamp.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<StoredMessage>,
    /// Total messages currently held for the room. `None` when the service omits it.
    #[serde(default, alias = "count", skip_serializing_if = "Option::is_none")]
    pub message_count: Option<u64>,
}

/// Server acknowledgement of an appended message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    pub id: String,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_validation() {
        assert!(RoomId::parse("0123456789abcdef0123456789abcdef").is_ok());
        assert!(RoomId::parse("0123456789ABCDEF0123456789abcdef").is_err());
        assert!(RoomId::parse("0123456789abcdef").is_err());
        assert!(RoomId::parse("g123456789abcdef0123456789abcdef").is_err());
    }

    #[test]
    fn room_id_from_bytes_is_hex() {
        let id = RoomId::from_bytes([0xab; ROOM_ID_LEN]);
        assert_eq!(id.as_str(), "ab".repeat(16));
    }

    #[test]
    fn room_id_rejected_during_deserialize() {
        let err = serde_json::from_str::<RoomId>("\"short\"");
        assert!(err.is_err());
    }

    #[test]
    fn secret_key_round_trips_and_checks_length() {
        let key = SecretKey::from_bytes([7u8; SECRET_KEY_LEN]);
        let encoded = key.to_base64url();
        assert_eq!(encoded.len(), 43);
        assert!(!encoded.contains('='));
        assert_eq!(SecretKey::from_base64url(&encoded).unwrap(), key);

        let short = crate::codec::bytes_to_base64url(&[1u8; 16]);
        assert!(matches!(SecretKey::from_base64url(&short), Err(VanishError::InvalidKey(_))));
    }

    #[test]
    fn secret_key_debug_is_redacted() {
        let key = SecretKey::from_bytes([42u8; SECRET_KEY_LEN]);
        assert_eq!(format!("{key:?}"), "SecretKey(<redacted>)");
    }

    #[test]
    fn message_page_accepts_count_alias_and_missing_count() {
        let page: MessagePage = serde_json::from_str(
            r#"{"messages":[{"id":"a","ciphertext":"x","iv":"y","timestamp":100}],"count":1}"#,
        )
        .unwrap();
        assert_eq!(page.message_count, Some(1));
        assert_eq!(page.messages[0].timestamp, 100);

        let page: MessagePage = serde_json::from_str(r#"{"messages":[]}"#).unwrap();
        assert_eq!(page.message_count, None);
    }
}
