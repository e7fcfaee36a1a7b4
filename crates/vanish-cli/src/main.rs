//! # Vanish CLI
//!
//! Terminal client for ephemeral end-to-end encrypted rooms:
//! - `new` creates a room and prints its share link
//! - `join` opens a live session (stdin in, messages out)
//! - `history`, `info`, `clear` are one-shot room operations
//! - `identity` shows or resets the local signing key
//!
//! Chat output goes to stdout; logs go to stderr (`RUST_LOG`, default `vanish=info`).

mod render;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use vanish_client::{HttpRoomApi, RoomApi, RoomSession, SessionEvent};
use vanish_common::config::ClientConfig;
use vanish_common::link::{build_link, parse_link};
use vanish_common::models::Credentials;
use vanish_crypto::{FileKeyStore, IdentityManager, default_backend, fingerprint, generate_credentials};

/// Vanish - ephemeral end-to-end encrypted group chat
#[derive(Parser)]
#[command(name = "vanish")]
#[command(version)]
#[command(about = "Ephemeral end-to-end encrypted group chat rooms")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new room and print its share link
    New,

    /// Join a room and chat (type /clear to wipe the room, /quit to leave)
    Join {
        /// Share link
        link: String,

        /// Display name (overrides identity.display_name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Print stored messages
    History {
        link: String,

        /// Only messages newer than this epoch-millisecond timestamp
        #[arg(long, default_value_t = 0)]
        after: i64,

        #[arg(long, default_value_t = 100)]
        limit: u32,
    },

    /// Delete every message in a room
    Clear { link: String },

    /// Show room metadata and expiry
    Info { link: String },

    /// Show the local identity fingerprint
    Identity {
        /// Delete the stored key pair; a new one is generated on next use
        #[arg(long)]
        reset: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = vanish_common::config::load().context("failed to load configuration")?;
    tracing::debug!(server = %config.server.url, "Configuration loaded");

    match cli.command {
        Commands::New => new_room(&config).await,
        Commands::Join { link, name } => join(&config, &link, name).await,
        Commands::History { link, after, limit } => history(&config, &link, after, limit).await,
        Commands::Clear { link } => clear(&config, &link).await,
        Commands::Info { link } => info(&config, &link).await,
        Commands::Identity { reset } => identity(&config, reset).await,
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vanish=info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn new_room(config: &ClientConfig) -> Result<()> {
    // A failed random source is the one unrecoverable condition; `?` aborts here.
    let creds = generate_credentials(default_backend().as_ref())?;
    let api = HttpRoomApi::from_config(config)?;
    let room = api.create_room(&creds.room_id).await?;

    println!("{}", build_link(config.server.link_origin(), &creds.room_id, &creds.secret_key));
    eprintln!("Room expires {}", render::datetime(room.expires_at));
    Ok(())
}

async fn join(config: &ClientConfig, link: &str, name: Option<String>) -> Result<()> {
    let creds = credentials(link)?;
    let manager = identity_manager(config)?;
    let identity = manager.get_or_create().await?;
    let sender = name.unwrap_or_else(|| config.identity.display_name.clone());

    let session = RoomSession::builder(creds, api(config)?)
        .identity(identity)
        .sender(sender.clone())
        .config(config.session.clone())
        .backend(Arc::clone(manager.backend()))
        .build();

    let room = session.room_info().await?;
    eprintln!(
        "Joined room {} as {sender} ({} messages, expires {})",
        room.room_id,
        room.message_count,
        render::remaining(chrono::Utc::now().timestamp_millis(), room.expires_at)
    );

    let mut events = session.subscribe();
    session.start()?;
    session.send_system(&format!("{sender} joined")).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(n)) => tracing::warn!("Display fell behind, {n} events dropped"),
                Err(RecvError::Closed) => break,
            },
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/clear" => match session.clear_messages().await {
                        Ok(()) => eprintln!("Room cleared"),
                        Err(e) => eprintln!("Clear failed: {e}"),
                    },
                    text => match session.send(text).await {
                        Ok(echo) if echo.delivered_by_poll => {}
                        Ok(echo) => println!("{}", render::line(&echo.message)),
                        Err(e) => eprintln!("Not sent: {e}"),
                    },
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if let Err(e) = session.send_system(&format!("{sender} left")).await {
        tracing::debug!("Could not announce leave: {e}");
    }
    session.stop().await;
    Ok(())
}

async fn history(config: &ClientConfig, link: &str, after: i64, limit: u32) -> Result<()> {
    let session = RoomSession::builder(credentials(link)?, api(config)?).build();
    for message in session.get_history(after, limit).await? {
        println!("{}", render::line(&message));
    }
    Ok(())
}

async fn clear(config: &ClientConfig, link: &str) -> Result<()> {
    let session = RoomSession::builder(credentials(link)?, api(config)?).build();
    session.clear_messages().await?;
    eprintln!("Room {} cleared", session.room_id());
    Ok(())
}

async fn info(config: &ClientConfig, link: &str) -> Result<()> {
    let creds = credentials(link)?;
    let room = api(config)?.get_room_info(&creds.room_id).await?;
    println!("room      {}", room.room_id);
    println!("created   {}", render::datetime(room.created_at));
    println!(
        "expires   {} ({})",
        render::datetime(room.expires_at),
        render::remaining(chrono::Utc::now().timestamp_millis(), room.expires_at)
    );
    println!("messages  {}", room.message_count);
    Ok(())
}

async fn identity(config: &ClientConfig, reset: bool) -> Result<()> {
    let store = FileKeyStore::from_config(&config.identity)?;
    let manager = IdentityManager::new(default_backend(), Arc::new(store.clone()));
    if reset {
        manager.reset().await?;
        eprintln!("Deleted {}", store.path().display());
        return Ok(());
    }
    let pair = manager.get_or_create().await?;
    println!("fingerprint  {}", fingerprint(manager.backend().as_ref(), &pair.public_key)?);
    println!("stored at    {}", store.path().display());
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn credentials(link: &str) -> Result<Credentials> {
    parse_link(link).context("not a valid Vanish room link")
}

fn api(config: &ClientConfig) -> Result<Arc<HttpRoomApi>> {
    Ok(Arc::new(HttpRoomApi::from_config(config)?))
}

fn identity_manager(config: &ClientConfig) -> Result<IdentityManager> {
    let store = FileKeyStore::from_config(&config.identity)?;
    Ok(IdentityManager::new(default_backend(), Arc::new(store)))
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Message(message) => println!("{}", render::line(message)),
        SessionEvent::DecryptError { id, .. } => eprintln!("(message {id} could not be decrypted)"),
        SessionEvent::Error { message, .. } => eprintln!("(connection problem: {message})"),
        SessionEvent::Cleared => eprintln!("(the room was cleared)"),
    }
}
