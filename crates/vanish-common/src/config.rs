//! Client configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for deployment.
//! Config precedence: env vars > .env file > vanish.toml > defaults

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Load the client configuration.
///
/// The result is returned rather than stashed in a global; callers pass it down
/// explicitly to the pieces that need it.
pub fn load() -> Result<ClientConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let cfg = config::Config::builder()
        // Defaults
        .set_default("server.url", "http://localhost:3000")?
        .set_default("session.poll_interval_ms", 2_000)?
        .set_default("session.request_timeout_ms", 10_000)?
        .set_default("session.page_size", 100)?
        .set_default("session.event_buffer", 256)?
        .set_default("identity.display_name", "anonymous")?
        // Optional config file
        .add_source(config::File::with_name("vanish").required(false))
        // Environment variables (VANISH__SERVER__URL, VANISH__SESSION__PAGE_SIZE, etc.)
        .add_source(
            config::Environment::with_prefix("VANISH")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    cfg.try_deserialize()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub identity: IdentityConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Base URL of the room-storage service (e.g. "https://vanish.example").
    pub url: String,
    /// Origin placed in front of share links. Falls back to `url` when unset.
    pub origin: Option<String>,
}

impl ServerConfig {
    pub fn link_origin(&self) -> &str {
        self.origin.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub poll_interval_ms: u64,
    /// Every outbound request is aborted after this long.
    pub request_timeout_ms: u64,
    /// Maximum number of messages requested per poll.
    pub page_size: u32,
    /// Capacity of the per-session event queue.
    pub event_buffer: usize,
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            request_timeout_ms: 10_000,
            page_size: 100,
            event_buffer: 256,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    /// Key-pair file. Unset means `<home>/.vanish/identity.json`.
    pub path: Option<PathBuf>,
    /// Sender name attached to outgoing messages.
    pub display_name: String,
}
