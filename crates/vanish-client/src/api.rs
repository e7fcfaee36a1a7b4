//! Room-storage service contract and its HTTP client.
//!
//! The service is an opaque, untrusted store of ciphertext. It must return
//! messages in ascending timestamp order; [`crate::RoomSession`] relies on that.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use vanish_common::config::ClientConfig;
use vanish_common::models::{EncryptedPayload, MessagePage, RoomId, RoomInfo, SentMessage};
use vanish_common::{VanishError, VanishResult};

#[async_trait]
pub trait RoomApi: Send + Sync {
    /// Fails with [`VanishError::Conflict`] if the id is taken.
    async fn create_room(&self, room_id: &RoomId) -> VanishResult<RoomInfo>;

    /// Fails with [`VanishError::NotFound`] if the room is missing or expired.
    async fn get_room_info(&self, room_id: &RoomId) -> VanishResult<RoomInfo>;

    async fn delete_room(&self, room_id: &RoomId) -> VanishResult<()>;

    async fn send_message(
        &self,
        room_id: &RoomId,
        payload: &EncryptedPayload,
    ) -> VanishResult<SentMessage>;

    /// Messages with `timestamp > after`, ascending, at most `limit`.
    async fn get_messages(&self, room_id: &RoomId, after: i64, limit: u32)
    -> VanishResult<MessagePage>;

    /// Deletes every message but keeps the room.
    async fn clear_messages(&self, room_id: &RoomId) -> VanishResult<()>;
}

// ─── HTTP client ─────────────────────────────────────────────────────────────

/// [`RoomApi`] over the service's JSON REST interface.
///
/// Every request is bounded by the configured timeout; an expired timeout is a
/// [`VanishError::Transport`].
#[derive(Clone)]
pub struct HttpRoomApi {
    client: Client,
    base_url: String,
}

impl HttpRoomApi {
    pub fn new(base_url: &str, timeout: Duration) -> VanishResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("Vanish/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| VanishError::Transport(format!("could not build HTTP client: {e}")))?;

        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_owned() })
    }

    pub fn from_config(config: &ClientConfig) -> VanishResult<Self> {
        Self::new(&config.server.url, config.session.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ── Internal ──────────────────────────────────────────────────────────────

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        room_id: &RoomId,
    ) -> VanishResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "room api request");

        let mut req = self.client.request(method, &url);
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_owned))
                .unwrap_or_else(|| status.to_string());
            return Err(status_error(status, message, room_id));
        }
        Ok(resp)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        room_id: &RoomId,
    ) -> VanishResult<T> {
        let resp = self.send(method, path, body, room_id).await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn delete(&self, path: &str, room_id: &RoomId) -> VanishResult<()> {
        self.send(Method::DELETE, path, None, room_id).await?;
        Ok(())
    }
}

#[async_trait]
impl RoomApi for HttpRoomApi {
    async fn create_room(&self, room_id: &RoomId) -> VanishResult<RoomInfo> {
        let body = json!({ "roomId": room_id });
        self.request(Method::POST, "/api/rooms", Some(&body), room_id).await
    }

    async fn get_room_info(&self, room_id: &RoomId) -> VanishResult<RoomInfo> {
        self.request(Method::GET, &room_path(room_id), None, room_id).await
    }

    async fn delete_room(&self, room_id: &RoomId) -> VanishResult<()> {
        self.delete(&room_path(room_id), room_id).await
    }

    async fn send_message(
        &self,
        room_id: &RoomId,
        payload: &EncryptedPayload,
    ) -> VanishResult<SentMessage> {
        let body = serde_json::to_value(payload)?;
        self.request(Method::POST, &messages_path(room_id), Some(&body), room_id).await
    }

    async fn get_messages(
        &self,
        room_id: &RoomId,
        after: i64,
        limit: u32,
    ) -> VanishResult<MessagePage> {
        let path = format!("{}?after={after}&limit={limit}", messages_path(room_id));
        self.request(Method::GET, &path, None, room_id).await
    }

    async fn clear_messages(&self, room_id: &RoomId) -> VanishResult<()> {
        self.delete(&messages_path(room_id), room_id).await
    }
}

fn room_path(room_id: &RoomId) -> String {
    format!("/api/rooms/{room_id}")
}

fn messages_path(room_id: &RoomId) -> String {
    format!("/api/rooms/{room_id}/messages")
}

fn status_error(status: StatusCode, message: String, room_id: &RoomId) -> VanishError {
    match status {
        StatusCode::NOT_FOUND => VanishError::NotFound { room_id: room_id.to_string() },
        StatusCode::CONFLICT => VanishError::Conflict { room_id: room_id.to_string() },
        _ => VanishError::Api { status: status.as_u16(), message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> RoomId {
        RoomId::parse("00112233445566778899aabbccddeeff").unwrap()
    }

    #[test]
    fn paths_follow_the_rest_layout() {
        assert_eq!(room_path(&room()), "/api/rooms/00112233445566778899aabbccddeeff");
        assert_eq!(
            messages_path(&room()),
            "/api/rooms/00112233445566778899aabbccddeeff/messages"
        );
    }

    #[test]
    fn statuses_map_to_error_classes() {
        let e = status_error(StatusCode::NOT_FOUND, "gone".into(), &room());
        assert!(matches!(e, VanishError::NotFound { ref room_id } if room_id == room().as_str()));

        let e = status_error(StatusCode::CONFLICT, "taken".into(), &room());
        assert!(matches!(e, VanishError::Conflict { .. }));

        let e = status_error(StatusCode::SERVICE_UNAVAILABLE, "try later".into(), &room());
        match e {
            VanishError::Api { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "try later");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn base_url_is_normalised() {
        let api = HttpRoomApi::new("http://localhost:3000/", Duration::from_secs(1)).unwrap();
        assert_eq!(api.base_url(), "http://localhost:3000");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        // Port 9 (discard) on loopback is closed in any sane test environment.
        let api = HttpRoomApi::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let res = api.get_room_info(&room()).await;
        assert!(matches!(res, Err(VanishError::Transport(_))));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and hold connections without ever answering.
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let api = HttpRoomApi::new(&format!("http://{addr}"), Duration::from_millis(200)).unwrap();
        let res = api.get_messages(&room(), 0, 10).await;
        assert!(
            matches!(res, Err(VanishError::Transport(ref m)) if m == "request timed out"),
            "unexpected {res:?}"
        );
        server.abort();
    }
}
