//! The room session: one poll/send loop bound to one room and one local identity.
//!
//! # State machine
//! `Idle → Polling → Stopped`. [`RoomSession::start`] spawns the poll task, which
//! polls immediately and then on a fixed interval. [`RoomSession::stop`] is
//! terminal; construct a new session to resume.
//!
//! # Poll cycle
//! 1. Fetch messages newer than the high-water mark (`last_timestamp`).
//! 2. If the service reports zero messages while we have seen some, the room was
//!    cleared: reset local state and publish [`SessionEvent::Cleared`].
//! 3. For each message in server order: skip ids already seen; otherwise decrypt,
//!    verify and publish a [`SessionEvent::Message`] (or a
//!    [`SessionEvent::DecryptError`]). The id is recorded and the high-water mark
//!    advanced either way, so a bad message is never retried.
//!
//! A failed fetch publishes [`SessionEvent::Error`] and leaves state untouched; the
//! next tick tries again. At most one cycle is in flight per session, and session
//! state sits behind one lock shared with `send`. Results that arrive after
//! `stop` are dropped.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vanish_common::config::SessionConfig;
use vanish_common::models::{
    Credentials, EncryptedPayload, IdentityKeyPair, MessagePage, MessageType, Payload,
    PlaintextMessage, RoomId, RoomInfo,
};
use vanish_common::{VanishError, VanishResult};
use vanish_crypto::identity::{sign_payload, verify_payload};
use vanish_crypto::{CryptoBackend, PayloadCipher, default_backend};

use crate::api::RoomApi;
use crate::event::SessionEvent;

const DEFAULT_SENDER: &str = "anonymous";
// `interval` panics on a zero period.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Polling,
    Stopped,
}

const IDLE: u8 = 0;
const POLLING: u8 = 1;
const STOPPED: u8 = 2;

impl SessionStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            IDLE => Self::Idle,
            POLLING => Self::Polling,
            _ => Self::Stopped,
        }
    }
}

/// Result of a successful send.
#[derive(Debug, Clone)]
pub struct SentEcho {
    /// Local rendering with the server-assigned id and timestamp.
    pub message: PlaintextMessage,
    /// A poll cycle already published this id while the send was in flight, so
    /// the caller must not display `message` again.
    pub delivered_by_poll: bool,
}

#[derive(Debug, Default)]
struct SessionState {
    last_timestamp: i64,
    seen_ids: HashSet<String>,
}

impl SessionState {
    fn reset(&mut self) {
        self.last_timestamp = 0;
        self.seen_ids.clear();
    }
}

// ─── Builder ─────────────────────────────────────────────────────────────────

pub struct SessionBuilder {
    credentials: Credentials,
    api: Arc<dyn RoomApi>,
    backend: Arc<dyn CryptoBackend>,
    identity: Option<IdentityKeyPair>,
    sender: String,
    config: SessionConfig,
}

impl SessionBuilder {
    /// Sign outgoing messages with this pair. Without one, messages go out unsigned.
    pub fn identity(mut self, identity: IdentityKeyPair) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Display name placed in every outgoing payload.
    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn CryptoBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn build(self) -> RoomSession {
        let (events, _) = broadcast::channel(self.config.event_buffer.max(1));
        let Credentials { room_id, secret_key } = self.credentials;
        let inner = Inner {
            room_id,
            api: self.api,
            cipher: PayloadCipher::new(Arc::clone(&self.backend), secret_key),
            backend: self.backend,
            identity: self.identity,
            sender: self.sender,
            config: self.config,
            state: Mutex::new(SessionState::default()),
            poll_guard: Mutex::new(()),
            status: AtomicU8::new(IDLE),
            events,
        };
        RoomSession { inner: Arc::new(inner), cancel: CancellationToken::new() }
    }
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// Handle to one room.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use vanish_client::{HttpRoomApi, RoomSession, SessionEvent};
/// use vanish_common::link::parse_link;
///
/// #[tokio::main]
/// async fn main() -> vanish_common::VanishResult<()> {
///     let creds = parse_link("https://vanish.example#/chat/00112233445566778899aabbccddeeff/AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA")
///         .expect("valid link");
///     let api = Arc::new(HttpRoomApi::new("https://vanish.example", std::time::Duration::from_secs(10))?);
///     let session = RoomSession::builder(creds, api).sender("Alice").build();
///     let mut events = session.subscribe();
///     session.start()?;
///     while let Ok(SessionEvent::Message(m)) = events.recv().await {
///         println!("{}: {}", m.sender, m.content);
///     }
///     Ok(())
/// }
/// ```
pub struct RoomSession {
    inner: Arc<Inner>,
    cancel: CancellationToken,
}

struct Inner {
    room_id: RoomId,
    api: Arc<dyn RoomApi>,
    cipher: PayloadCipher,
    backend: Arc<dyn CryptoBackend>,
    identity: Option<IdentityKeyPair>,
    sender: String,
    config: SessionConfig,
    state: Mutex<SessionState>,
    /// Held for a whole poll cycle; the background loop and `poll_now` share it.
    poll_guard: Mutex<()>,
    status: AtomicU8,
    events: broadcast::Sender<SessionEvent>,
}

impl RoomSession {
    pub fn builder(credentials: Credentials, api: Arc<dyn RoomApi>) -> SessionBuilder {
        SessionBuilder {
            credentials,
            api,
            backend: default_backend(),
            identity: None,
            sender: DEFAULT_SENDER.to_owned(),
            config: SessionConfig::default(),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.inner.room_id
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_u8(self.inner.status.load(Ordering::Acquire))
    }

    /// Register a consumer of the event feed. Events published before this call
    /// are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Spawn the poll task. Returns immediately; the first poll runs right away.
    pub fn start(&self) -> VanishResult<()> {
        self.inner
            .status
            .compare_exchange(IDLE, POLLING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|s| {
                VanishError::InvalidState(format!(
                    "cannot start a session that is {:?}",
                    SessionStatus::from_u8(s)
                ))
            })?;

        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        info!(room_id = %inner.room_id, interval_ms = inner.config.poll_interval_ms, "Session polling started");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.poll_interval().max(MIN_POLL_INTERVAL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = inner.run_cycle(&cancel) => {}
                }
            }
            debug!(room_id = %inner.room_id, "Poll task exited");
        });

        Ok(())
    }

    /// Stop polling and discard session state. Safe to call at any time, repeatedly.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let previous = self.inner.status.swap(STOPPED, Ordering::AcqRel);
        self.inner.state.lock().await.reset();
        if previous != STOPPED {
            info!(room_id = %self.inner.room_id, "Session stopped");
        }
    }

    /// Run one poll cycle now and return how many messages were delivered.
    /// Unlike the background loop, a failed fetch is returned to the caller.
    /// Waits for an in-flight background cycle to finish first.
    pub async fn poll_now(&self) -> VanishResult<usize> {
        self.ensure_not_stopped()?;
        self.inner.poll_once(&self.cancel).await
    }

    /// Sign (when an identity is configured), encrypt and submit a text message.
    ///
    /// Returns the local echo with the server-assigned id and timestamp. Its id is
    /// recorded so the poll loop never delivers it again; if a poll got there
    /// first, [`SentEcho::delivered_by_poll`] is set. Failures do not touch
    /// session state and are not retried.
    pub async fn send(&self, content: &str) -> VanishResult<SentEcho> {
        self.send_kind(content, MessageType::Text).await
    }

    /// Like [`RoomSession::send`] with `type: "system"` (join/leave notices).
    pub async fn send_system(&self, content: &str) -> VanishResult<SentEcho> {
        self.send_kind(content, MessageType::System).await
    }

    async fn send_kind(&self, content: &str, kind: MessageType) -> VanishResult<SentEcho> {
        self.ensure_not_stopped()?;
        let inner = &self.inner;

        let payload = match &inner.identity {
            Some(identity) => {
                sign_payload(inner.backend.as_ref(), identity, &inner.sender, content, kind)?
            }
            None => Payload::new(inner.sender.as_str(), content, kind),
        };
        let encrypted = inner.cipher.encrypt(&payload)?;
        let sent = inner.api.send_message(&inner.room_id, &encrypted).await?;
        debug!(room_id = %inner.room_id, id = %sent.id, "Message sent");

        let mut state = inner.state.lock().await;
        let delivered_by_poll =
            !self.cancel.is_cancelled() && !state.seen_ids.insert(sent.id.clone());
        drop(state);
        if delivered_by_poll {
            debug!(room_id = %inner.room_id, id = %sent.id, "Own message already delivered by poll");
        }

        Ok(SentEcho {
            message: verify_payload(inner.backend.as_ref(), payload, &sent.id, sent.timestamp),
            delivered_by_poll,
        })
    }

    /// Fetch and decrypt messages without touching session state.
    ///
    /// Messages that fail to decrypt are logged and left out. The result is in
    /// ascending timestamp order, server order kept for equal timestamps.
    pub async fn get_history(&self, after: i64, limit: u32) -> VanishResult<Vec<PlaintextMessage>> {
        let inner = &self.inner;
        let page = inner.api.get_messages(&inner.room_id, after, limit).await?;

        let mut history: Vec<PlaintextMessage> = page
            .messages
            .into_iter()
            .filter_map(|stored| match inner.open(&stored.id, &stored.encrypted(), stored.timestamp) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(room_id = %inner.room_id, id = %stored.id, "Skipping undecryptable history entry: {e}");
                    None
                }
            })
            .collect();
        history.sort_by_key(|m| m.timestamp);
        Ok(history)
    }

    /// Delete every message in the room and reset local state.
    pub async fn clear_messages(&self) -> VanishResult<()> {
        let inner = &self.inner;
        inner.api.clear_messages(&inner.room_id).await?;

        let mut state = inner.state.lock().await;
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        state.reset();
        drop(state);

        info!(room_id = %inner.room_id, "Room cleared");
        inner.publish(SessionEvent::Cleared);
        Ok(())
    }

    /// Record an id as already displayed so polling will not deliver it.
    ///
    /// `timestamp` is accepted for callers that track it but does not move the
    /// high-water mark: other people's messages may still be pending at or below it.
    pub async fn mark_seen(&self, id: impl Into<String>, timestamp: i64) {
        debug!(room_id = %self.inner.room_id, timestamp, "Marking id as seen");
        let mut state = self.inner.state.lock().await;
        if !self.cancel.is_cancelled() {
            state.seen_ids.insert(id.into());
        }
    }

    pub async fn room_info(&self) -> VanishResult<RoomInfo> {
        self.inner.api.get_room_info(&self.inner.room_id).await
    }

    pub async fn seen_count(&self) -> usize {
        self.inner.state.lock().await.seen_ids.len()
    }

    pub async fn last_timestamp(&self) -> i64 {
        self.inner.state.lock().await.last_timestamp
    }

    fn ensure_not_stopped(&self) -> VanishResult<()> {
        if self.status() == SessionStatus::Stopped {
            return Err(VanishError::InvalidState("session is stopped".into()));
        }
        Ok(())
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ─── Poll cycle ──────────────────────────────────────────────────────────────

impl Inner {
    /// One background tick. Failures become events, never panics or early exits.
    async fn run_cycle(&self, cancel: &CancellationToken) {
        if let Err(e) = self.poll_once(cancel).await {
            warn!(room_id = %self.room_id, code = e.error_code(), "Poll failed: {e}");
            self.publish(SessionEvent::Error {
                code: e.error_code().to_owned(),
                message: e.to_string(),
            });
        }
    }

    async fn poll_once(&self, cancel: &CancellationToken) -> VanishResult<usize> {
        let _cycle = self.poll_guard.lock().await;
        if cancel.is_cancelled() {
            return Ok(0);
        }
        let after = self.state.lock().await.last_timestamp;
        let page = self.api.get_messages(&self.room_id, after, self.config.page_size).await?;

        let mut state = self.state.lock().await;
        if cancel.is_cancelled() {
            debug!(room_id = %self.room_id, "Discarding poll result after stop");
            return Ok(0);
        }
        Ok(self.apply_page(&mut state, page))
    }

    fn apply_page(&self, state: &mut SessionState, page: MessagePage) -> usize {
        if page.message_count == Some(0) && !state.seen_ids.is_empty() {
            info!(room_id = %self.room_id, dropped = state.seen_ids.len(), "Room was cleared remotely, resetting");
            state.reset();
            self.publish(SessionEvent::Cleared);
        }

        let mut delivered = 0;
        for stored in page.messages {
            if state.seen_ids.contains(&stored.id) {
                continue;
            }
            match self.open(&stored.id, &stored.encrypted(), stored.timestamp) {
                Ok(message) => {
                    delivered += 1;
                    self.publish(SessionEvent::Message(message));
                }
                Err(e) => {
                    warn!(room_id = %self.room_id, id = %stored.id, "Could not decrypt message: {e}");
                    self.publish(SessionEvent::DecryptError {
                        id: stored.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
            state.last_timestamp = state.last_timestamp.max(stored.timestamp);
            state.seen_ids.insert(stored.id);
        }
        delivered
    }

    fn open(
        &self,
        id: &str,
        encrypted: &EncryptedPayload,
        timestamp: i64,
    ) -> VanishResult<PlaintextMessage> {
        let payload = self.cipher.decrypt(encrypted)?;
        Ok(verify_payload(self.backend.as_ref(), payload, id, timestamp))
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine; the feed is fire-and-forget.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::Notify;
    use vanish_common::models::{SecretKey, SentMessage, StoredMessage};
    use vanish_crypto::RustCrypto;
    use vanish_crypto::identity::generate_identity;

    // ── In-memory room service ────────────────────────────────────────────────

    #[derive(Default)]
    struct FakeApi {
        messages: std::sync::Mutex<Vec<StoredMessage>>,
        fail_next_poll: std::sync::Mutex<Option<VanishError>>,
        fail_sends: std::sync::atomic::AtomicBool,
        report_count: std::sync::atomic::AtomicBool,
        polls: AtomicUsize,
        gate: std::sync::Mutex<Option<Arc<Notify>>>,
        /// Blocks `send_message` after the message is stored, before the reply.
        send_gate: std::sync::Mutex<Option<Arc<Notify>>>,
    }

    impl FakeApi {
        fn new() -> Arc<Self> {
            let api = Self::default();
            api.report_count.store(true, Ordering::SeqCst);
            Arc::new(api)
        }

        fn push(&self, msg: StoredMessage) {
            self.messages.lock().unwrap().push(msg);
        }
    }

    #[async_trait]
    impl RoomApi for FakeApi {
        async fn create_room(&self, _room_id: &RoomId) -> VanishResult<RoomInfo> {
            unimplemented!()
        }

        async fn get_room_info(&self, room_id: &RoomId) -> VanishResult<RoomInfo> {
            Ok(RoomInfo {
                room_id: room_id.clone(),
                created_at: 0,
                expires_at: 86_400_000,
                message_count: self.messages.lock().unwrap().len() as u64,
            })
        }

        async fn delete_room(&self, _room_id: &RoomId) -> VanishResult<()> {
            Ok(())
        }

        async fn send_message(
            &self,
            _room_id: &RoomId,
            payload: &EncryptedPayload,
        ) -> VanishResult<SentMessage> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(VanishError::Transport("connection reset".into()));
            }
            let (id, timestamp) = {
                let mut messages = self.messages.lock().unwrap();
                let timestamp = messages.last().map_or(1_000, |m| m.timestamp + 1);
                let id = format!("srv-{}", messages.len() + 1);
                messages.push(StoredMessage {
                    id: id.clone(),
                    ciphertext: payload.ciphertext.clone(),
                    iv: payload.iv.clone(),
                    timestamp,
                });
                (id, timestamp)
            };
            let gate = self.send_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            Ok(SentMessage { id, timestamp })
        }

        async fn get_messages(
            &self,
            _room_id: &RoomId,
            after: i64,
            limit: u32,
        ) -> VanishResult<MessagePage> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if let Some(e) = self.fail_next_poll.lock().unwrap().take() {
                return Err(e);
            }
            let messages = self.messages.lock().unwrap();
            let page: Vec<_> = messages
                .iter()
                .filter(|m| m.timestamp > after)
                .take(limit as usize)
                .cloned()
                .collect();
            let message_count =
                self.report_count.load(Ordering::SeqCst).then_some(messages.len() as u64);
            Ok(MessagePage { messages: page, message_count })
        }

        async fn clear_messages(&self, _room_id: &RoomId) -> VanishResult<()> {
            self.messages.lock().unwrap().clear();
            Ok(())
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn key() -> SecretKey {
        SecretKey::from_bytes([7u8; 32])
    }

    fn credentials() -> Credentials {
        Credentials {
            room_id: RoomId::parse("00112233445566778899aabbccddeeff").unwrap(),
            secret_key: key(),
        }
    }

    fn stored(id: &str, ts: i64, content: &str) -> StoredMessage {
        let enc = PayloadCipher::new(Arc::new(RustCrypto), key())
            .encrypt(&Payload::text("Bob", content))
            .unwrap();
        StoredMessage { id: id.into(), ciphertext: enc.ciphertext, iv: enc.iv, timestamp: ts }
    }

    fn session(api: Arc<FakeApi>) -> RoomSession {
        RoomSession::builder(credentials(), api).sender("Alice").build()
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn message_ids(events: &[SessionEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Message(m) => Some(m.id.clone()),
                _ => None,
            })
            .collect()
    }

    // ── Poll processing ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn same_timestamp_messages_all_delivered_in_order() {
        let api = FakeApi::new();
        api.push(stored("a", 100, "one"));
        api.push(stored("b", 100, "two"));
        api.push(stored("c", 200, "three"));
        let s = session(api.clone());
        let mut rx = s.subscribe();

        assert_eq!(s.poll_now().await.unwrap(), 3);
        let events = drain(&mut rx);
        assert_eq!(message_ids(&events), ["a", "b", "c"]);
        assert_eq!(s.last_timestamp().await, 200);

        assert_eq!(s.poll_now().await.unwrap(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn duplicate_ids_are_delivered_once() {
        let api = FakeApi::new();
        let s = session(api);
        let mut rx = s.subscribe();
        let page = MessagePage { messages: vec![stored("a", 100, "hi")], message_count: Some(1) };

        {
            let mut state = s.inner.state.lock().await;
            assert_eq!(s.inner.apply_page(&mut state, page.clone()), 1);
            assert_eq!(s.inner.apply_page(&mut state, page), 0);
        }
        assert_eq!(message_ids(&drain(&mut rx)), ["a"]);
    }

    #[tokio::test]
    async fn remote_clear_resets_state_without_messages() {
        let api = FakeApi::new();
        api.push(stored("a", 100, "one"));
        api.push(stored("b", 150, "two"));
        let s = session(api.clone());
        let mut rx = s.subscribe();

        s.poll_now().await.unwrap();
        assert_eq!(s.seen_count().await, 2);
        drain(&mut rx);

        api.messages.lock().unwrap().clear();
        assert_eq!(s.poll_now().await.unwrap(), 0);

        assert_eq!(s.seen_count().await, 0);
        assert_eq!(s.last_timestamp().await, 0);
        let events = drain(&mut rx);
        assert!(message_ids(&events).is_empty());
        assert!(matches!(events.as_slice(), [SessionEvent::Cleared]));

        // New messages after the clear start from a clean high-water mark.
        api.push(stored("c", 50, "fresh"));
        s.poll_now().await.unwrap();
        assert_eq!(message_ids(&drain(&mut rx)), ["c"]);
    }

    #[tokio::test]
    async fn missing_count_is_not_a_clear() {
        let api = FakeApi::new();
        api.push(stored("a", 100, "one"));
        let s = session(api.clone());
        s.poll_now().await.unwrap();

        api.report_count.store(false, Ordering::SeqCst);
        s.poll_now().await.unwrap();
        assert_eq!(s.seen_count().await, 1);
        assert_eq!(s.last_timestamp().await, 100);
    }

    #[tokio::test]
    async fn undecryptable_message_is_reported_and_skipped() {
        let api = FakeApi::new();
        api.push(stored("a", 100, "one"));
        let foreign = PayloadCipher::new(Arc::new(RustCrypto), SecretKey::from_bytes([9u8; 32]))
            .encrypt(&Payload::text("Eve", "?"))
            .unwrap();
        api.push(StoredMessage { id: "bad".into(), ciphertext: foreign.ciphertext, iv: foreign.iv, timestamp: 110 });
        api.push(stored("c", 120, "three"));
        let s = session(api);
        let mut rx = s.subscribe();

        assert_eq!(s.poll_now().await.unwrap(), 2);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[1], SessionEvent::DecryptError { id, .. } if id == "bad"));
        assert_eq!(message_ids(&events), ["a", "c"]);

        // Never retried.
        assert_eq!(s.seen_count().await, 3);
        assert_eq!(s.last_timestamp().await, 120);
        s.poll_now().await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn poll_now_surfaces_transport_errors_without_mutation() {
        let api = FakeApi::new();
        api.push(stored("a", 100, "one"));
        *api.fail_next_poll.lock().unwrap() = Some(VanishError::Transport("timeout".into()));
        let s = session(api);

        assert!(matches!(s.poll_now().await, Err(VanishError::Transport(_))));
        assert_eq!(s.seen_count().await, 0);
        assert_eq!(s.poll_now().await.unwrap(), 1);
    }

    // ── Send ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn sent_message_is_not_echoed_back() {
        let api = FakeApi::new();
        let identity = generate_identity(&RustCrypto).unwrap();
        let s = RoomSession::builder(credentials(), api.clone())
            .sender("Alice")
            .identity(identity.clone())
            .build();
        let mut rx = s.subscribe();

        let sent = s.send("hello").await.unwrap();
        assert!(!sent.delivered_by_poll);
        let echo = sent.message;
        assert_eq!(echo.sender, "Alice");
        assert_eq!(echo.content, "hello");
        assert!(echo.verified);
        assert_eq!(echo.public_key.as_deref(), Some(identity.public_key.as_str()));
        assert_eq!(echo.fingerprint.as_ref().map(String::len), Some(4));

        assert_eq!(s.poll_now().await.unwrap(), 0);
        assert!(message_ids(&drain(&mut rx)).is_empty());
        // The own message still advances the high-water mark once polled.
        assert_eq!(s.last_timestamp().await, echo.timestamp);
    }

    #[tokio::test]
    async fn other_sessions_receive_signed_messages() {
        let api = FakeApi::new();
        let alice = RoomSession::builder(credentials(), api.clone())
            .sender("Alice")
            .identity(generate_identity(&RustCrypto).unwrap())
            .build();
        let bob = session(api);
        let mut rx = bob.subscribe();

        alice.send("hi bob").await.unwrap();
        alice.send_system("Alice left").await.unwrap();
        bob.poll_now().await.unwrap();

        let events = drain(&mut rx);
        let msgs: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Message(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(msgs.len(), 2);
        assert!(msgs.iter().all(|m| m.verified && m.sender == "Alice"));
        assert_eq!(msgs[0].kind, MessageType::Text);
        assert_eq!(msgs[1].kind, MessageType::System);
    }

    #[tokio::test]
    async fn unsigned_send_without_identity() {
        let api = FakeApi::new();
        let s = session(api);
        let echo = s.send("plain").await.unwrap().message;
        assert!(!echo.verified);
        assert!(echo.fingerprint.is_none());
    }

    #[tokio::test]
    async fn failed_send_leaves_state_alone() {
        let api = FakeApi::new();
        api.fail_sends.store(true, Ordering::SeqCst);
        let s = session(api);

        assert!(matches!(s.send("lost").await, Err(VanishError::Transport(_))));
        assert_eq!(s.seen_count().await, 0);
        assert_eq!(s.last_timestamp().await, 0);
    }

    #[tokio::test]
    async fn mark_seen_suppresses_delivery_only() {
        let api = FakeApi::new();
        api.push(stored("a", 100, "one"));
        api.push(stored("b", 200, "two"));
        let s = session(api);
        let mut rx = s.subscribe();

        s.mark_seen("b", 200).await;
        assert_eq!(s.last_timestamp().await, 0);
        s.poll_now().await.unwrap();
        assert_eq!(message_ids(&drain(&mut rx)), ["a"]);
    }

    // ── History / clear / info ────────────────────────────────────────────────

    #[tokio::test]
    async fn history_is_stateless_and_skips_bad_entries() {
        let api = FakeApi::new();
        api.push(stored("a", 100, "one"));
        api.push(StoredMessage { id: "junk".into(), ciphertext: "%%".into(), iv: "AA".into(), timestamp: 150 });
        api.push(stored("c", 200, "three"));
        let s = session(api);

        let history = s.get_history(0, 50).await.unwrap();
        let ids: Vec<_> = history.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
        assert_eq!(s.seen_count().await, 0);

        let later = s.get_history(100, 50).await.unwrap();
        assert_eq!(later.len(), 1);
    }

    #[tokio::test]
    async fn clear_messages_resets_and_notifies() {
        let api = FakeApi::new();
        api.push(stored("a", 100, "one"));
        let s = session(api.clone());
        let mut rx = s.subscribe();
        s.poll_now().await.unwrap();
        drain(&mut rx);

        s.clear_messages().await.unwrap();
        assert!(api.messages.lock().unwrap().is_empty());
        assert_eq!(s.seen_count().await, 0);
        assert!(matches!(drain(&mut rx).as_slice(), [SessionEvent::Cleared]));
        assert_eq!(s.room_info().await.unwrap().message_count, 0);
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn polling_loop_delivers_and_survives_errors() {
        let api = FakeApi::new();
        api.push(stored("a", 100, "one"));
        let s = session(api.clone());
        let mut rx = s.subscribe();

        s.start().unwrap();
        assert_eq!(s.status(), SessionStatus::Polling);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, SessionEvent::Message(ref m) if m.id == "a"));

        *api.fail_next_poll.lock().unwrap() = Some(VanishError::Transport("offline".into()));
        let err = rx.recv().await.unwrap();
        assert!(matches!(err, SessionEvent::Error { ref code, .. } if code == "TRANSPORT_ERROR"));

        api.push(stored("b", 200, "two"));
        let next = rx.recv().await.unwrap();
        assert!(matches!(next, SessionEvent::Message(ref m) if m.id == "b"));

        s.stop().await;
        assert_eq!(s.status(), SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn start_twice_and_restart_are_rejected() {
        let s = session(FakeApi::new());
        s.start().unwrap();
        assert!(matches!(s.start(), Err(VanishError::InvalidState(_))));

        s.stop().await;
        s.stop().await;
        assert!(matches!(s.start(), Err(VanishError::InvalidState(_))));
        assert!(matches!(s.poll_now().await, Err(VanishError::InvalidState(_))));
        assert!(matches!(s.send("x").await, Err(VanishError::InvalidState(_))));
    }

    #[tokio::test]
    async fn late_poll_result_is_discarded_after_stop() {
        let api = FakeApi::new();
        api.push(stored("a", 100, "one"));
        let gate = Arc::new(Notify::new());
        *api.gate.lock().unwrap() = Some(gate.clone());

        let s = Arc::new(session(api.clone()));
        let mut rx = s.subscribe();

        let poller = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.poll_now().await })
        };
        while api.polls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        s.stop().await;
        gate.notify_one();

        assert_eq!(poller.await.unwrap().unwrap(), 0);
        assert_eq!(s.seen_count().await, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn own_message_polled_mid_send_is_shown_once() {
        let api = FakeApi::new();
        let send_gate = Arc::new(Notify::new());
        *api.send_gate.lock().unwrap() = Some(send_gate.clone());

        let s = Arc::new(session(api.clone()));
        let mut rx = s.subscribe();

        let sender = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.send("racing").await })
        };
        // Stored on the server, reply not yet received.
        while api.messages.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }

        assert_eq!(s.poll_now().await.unwrap(), 1);
        send_gate.notify_one();
        let sent = sender.await.unwrap().unwrap();

        let feed = message_ids(&drain(&mut rx));
        assert_eq!(feed, [sent.message.id.clone()]);
        assert!(sent.delivered_by_poll);

        // Later polls stay quiet.
        assert_eq!(s.poll_now().await.unwrap(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn poll_now_waits_for_background_cycle() {
        let api = FakeApi::new();
        api.push(stored("a", 100, "one"));
        let gate = Arc::new(Notify::new());
        *api.gate.lock().unwrap() = Some(gate.clone());

        let s = Arc::new(session(api.clone()));
        let mut rx = s.subscribe();
        s.start().unwrap();
        while api.polls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let manual = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.poll_now().await })
        };
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(api.polls.load(Ordering::SeqCst), 1);

        // Release the background cycle; the manual one then starts from its result.
        gate.notify_one();
        while api.polls.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        assert_eq!(manual.await.unwrap().unwrap(), 0);
        assert_eq!(message_ids(&drain(&mut rx)), ["a"]);
        s.stop().await;
    }
}
