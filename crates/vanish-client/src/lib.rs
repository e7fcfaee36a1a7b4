//! # vanish-client
//!
//! The room session protocol on top of `vanish-crypto`: talks to the room-storage
//! service, turns its ciphertext stream into verified plaintext events, and sends
//! signed messages back.

pub mod api;
pub mod event;
pub mod session;

pub use api::{HttpRoomApi, RoomApi};
pub use event::SessionEvent;
pub use session::{RoomSession, SentEcho, SessionBuilder, SessionStatus};
