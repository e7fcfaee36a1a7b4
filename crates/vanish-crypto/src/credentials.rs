//! Fresh room credentials.
//!
//! The room id and the secret key come from two independent draws, so the public
//! id says nothing about the key.

use zeroize::Zeroizing;

use vanish_common::VanishResult;
use vanish_common::models::{Credentials, ROOM_ID_LEN, RoomId, SECRET_KEY_LEN, SecretKey};

use crate::backend::CryptoBackend;

/// Generate a new room id and secret key. No network or disk I/O.
///
/// The only failure is the random source itself ([`vanish_common::VanishError::RandomSource`]),
/// after which callers must not continue.
pub fn generate_credentials(backend: &dyn CryptoBackend) -> VanishResult<Credentials> {
    let mut id_bytes = [0u8; ROOM_ID_LEN];
    backend.fill_random(&mut id_bytes)?;

    let mut key_bytes = Zeroizing::new([0u8; SECRET_KEY_LEN]);
    backend.fill_random(&mut key_bytes[..])?;

    Ok(Credentials {
        room_id: RoomId::from_bytes(id_bytes),
        secret_key: SecretKey::from_bytes(*key_bytes),
    })
}
