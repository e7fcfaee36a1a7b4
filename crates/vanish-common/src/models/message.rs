//! Message payloads at every layer of the pipeline.
//!
//! ```text
//! Payload ──encrypt──► EncryptedPayload ──send──► StoredMessage (server)
//!                                                      │
//! PlaintextMessage ◄──verify── Payload ◄──decrypt──────┘
//! ```

use serde::{Deserialize, Serialize};

/// Kind of chat line. System lines carry notices such as joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    System,
}

/// The decrypted JSON unit of encryption.
///
/// `public_key` and `signature` travel together. A payload carrying only one of
/// them is treated as unsigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub sender: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Base64 SPKI-encoded verification key of the author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Base64 signature over [`Payload::signing_input`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Payload {
    pub fn new(sender: impl Into<String>, content: impl Into<String>, kind: MessageType) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
            kind,
            public_key: None,
            signature: None,
        }
    }

    pub fn text(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(sender, content, MessageType::Text)
    }

    pub fn system(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(sender, content, MessageType::System)
    }

    /// The exact bytes a signature covers: `sender:content`.
    ///
    /// `type`, id and timestamp are not bound.
    pub fn signing_input(sender: &str, content: &str) -> String {
        format!("{sender}:{content}")
    }

    /// `(public_key, signature)` when both are present.
    pub fn signature_parts(&self) -> Option<(&str, &str)> {
        match (&self.public_key, &self.signature) {
            (Some(pk), Some(sig)) => Some((pk.as_str(), sig.as_str())),
            _ => None,
        }
    }
}

/// What the storage service holds: opaque to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Base64 ciphertext with the 16-byte tag appended.
    pub ciphertext: String,
    /// Base64 12-byte nonce.
    pub iv: String,
}

/// A verified message as delivered to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaintextMessage {
    pub id: String,
    pub sender: String,
    pub content: String,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// 4 hex chars; present only for signed payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub verified: bool,
}
