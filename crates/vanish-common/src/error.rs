//! Centralized error types for Vanish.
//!
//! Uses `thiserror` for ergonomic error definitions. Every failure the client core
//! can produce falls into one of these classes; callers decide per class whether to
//! skip-and-report (decode / decryption) or surface (transport, conflict, not found).

/// Core error type used across all Vanish crates.
#[derive(Debug, thiserror::Error)]
pub enum VanishError {
    // === Data errors (skip-and-report) ===
    #[error("Decode error: {0}")]
    Decode(String),

    /// Wrong key and tampered ciphertext deliberately collapse into one variant.
    #[error("Decryption failed")]
    Decryption,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    // === Remote errors ===
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Room {room_id} already exists")]
    Conflict { room_id: String },

    #[error("Room {room_id} not found")]
    NotFound { room_id: String },

    // === Local errors ===
    #[error("Secure random source failed: {0}")]
    RandomSource(String),

    #[error("Key store error: {0}")]
    KeyStore(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),
}

impl VanishError {
    /// Error code string for programmatic handling by callers.
    pub fn error_code(&self) -> &str {
        match self {
            Self::Decode(_) => "DECODE_ERROR",
            Self::Decryption => "DECRYPTION_ERROR",
            Self::InvalidKey(_) => "INVALID_KEY",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Api { .. } => "API_ERROR",
            Self::Conflict { .. } => "CONFLICT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::RandomSource(_) => "RANDOM_SOURCE_FAILURE",
            Self::KeyStore(_) => "KEY_STORE_ERROR",
            Self::InvalidState(_) => "INVALID_STATE",
        }
    }

    /// Whether the error concerns a single item and processing can move on to the next one.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::RandomSource(_))
    }
}

impl From<base64::DecodeError> for VanishError {
    fn from(e: base64::DecodeError) -> Self {
        Self::Decode(format!("base64: {e}"))
    }
}

impl From<hex::FromHexError> for VanishError {
    fn from(e: hex::FromHexError) -> Self {
        Self::Decode(format!("hex: {e}"))
    }
}

impl From<serde_json::Error> for VanishError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(format!("json: {e}"))
    }
}

impl From<reqwest::Error> for VanishError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Transport("request timed out".into());
        }
        Self::Transport(e.to_string())
    }
}

/// Convenience type alias for Results using VanishError.
pub type VanishResult<T> = Result<T, VanishError>;
