//! Events published by a [`crate::RoomSession`].

use vanish_common::models::PlaintextMessage;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A new message decrypted and passed through verification.
    Message(PlaintextMessage),
    /// A stored message could not be decoded or decrypted. It is not retried.
    DecryptError { id: String, error: String },
    /// A poll request failed as a whole. Polling continues on the next tick.
    Error { code: String, message: String },
    /// The room was emptied on the server and local state was reset.
    Cleared,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::DecryptError { .. } => "decrypt_error",
            Self::Error { .. } => "error",
            Self::Cleared => "cleared",
        }
    }
}
