//! Core domain models shared across all Vanish crates.
//!
//! Wire-facing types serialize with camelCase field names so they match what the
//! room-storage service and other clients exchange.

pub mod identity;
pub mod message;
pub mod room;

/// Re-export all model types for convenience.
pub use identity::*;
pub use message::*;
pub use room::*;
