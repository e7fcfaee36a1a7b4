//! Share links, the only out-of-band credential exchange.
//!
//! Current form (key and room both in the fragment, so neither reaches a server):
//!
//! ```text
//! https://vanish.example#/chat/{roomId}/{secretKey}
//! ```
//!
//! Legacy form, still accepted:
//!
//! ```text
//! https://vanish.example/chat/{roomId}#{secretKey}
//! ```

use url::Url;

use crate::models::{Credentials, RoomId, SecretKey};

const CHAT_SEGMENT: &str = "chat";

/// Build a share link for `origin` (scheme + host, optionally a path prefix).
pub fn build_link(origin: &str, room_id: &RoomId, secret_key: &SecretKey) -> String {
    format!(
        "{}#/{CHAT_SEGMENT}/{}/{}",
        origin.trim_end_matches('/'),
        room_id,
        secret_key.to_base64url()
    )
}

/// Extract credentials from a share link.
///
/// Returns `None` for anything that is not a well-formed link: unparsable URL,
/// a room id that is not 32 lowercase hex chars, or a missing/invalid key.
pub fn parse_link(link: &str) -> Option<Credentials> {
    let url = Url::parse(link.trim()).ok()?;
    let fragment = url.fragment()?;

    if let Some(rest) = fragment.strip_prefix('/') {
        if let Some(creds) = parse_fragment_form(rest) {
            return Some(creds);
        }
    }
    parse_legacy_form(&url, fragment)
}

fn parse_fragment_form(fragment: &str) -> Option<Credentials> {
    let mut parts = fragment.trim_end_matches('/').split('/');
    if parts.next()? != CHAT_SEGMENT {
        return None;
    }
    let room_id = RoomId::parse(parts.next()?).ok()?;
    let secret_key = SecretKey::from_base64url(parts.next()?).ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(Credentials { room_id, secret_key })
}

fn parse_legacy_form(url: &Url, fragment: &str) -> Option<Credentials> {
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    let [.., chat, room] = segments.as_slice() else {
        return None;
    };
    if *chat != CHAT_SEGMENT {
        return None;
    }
    let room_id = RoomId::parse(room).ok()?;
    let secret_key = SecretKey::from_base64url(fragment).ok()?;
    Some(Credentials { room_id, secret_key })
}
