//! # Voice Chat Client - Operator Entry Point
//!
//! A small console binary that exercises the full client surface end-to-end:
//! load configuration, connect to the speech backend, stream microphone
//! audio, and print sealed transcripts until interrupted.
//!
//! ## What this binary does:
//! 1. **Loads configuration** from config.toml and environment variables
//! 2. **Sets up logging** (tracing) for debugging and monitoring
//! 3. **Connects** to the configured speech backend and waits for the link
//! 4. **Streams** microphone audio and prints transcripts as they seal
//! 5. **Handles graceful shutdown** when receiving system signals
//!
//! ## Environment Variables:
//! - `RUST_LOG`: Controls what gets logged (defaults to this crate at debug)
//! - `VOICE_SERVER_URL`: Deployment shorthand for the backend URL
//! - `APP_*`: Overrides for any configuration field

use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};

use voice_chat_client::{ClientConfig, ConnectionStatus, VoiceChatClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    init_tracing()?;

    // Load and validate configuration before touching the network
    let config = ClientConfig::load()?;
    config.validate()?;

    info!("Starting voice-chat-client v{}", env!("CARGO_PKG_VERSION"));
    info!("Speech backend: {}", config.server.url);
    info!(
        "Audio format: {}Hz/{}ch/{}-bit, {}ms frames",
        config.audio.sample_rate,
        config.audio.channels,
        config.audio.bit_depth,
        config.audio.frame_duration_ms
    );

    let push_to_talk = config.voice.push_to_talk;
    let client = VoiceChatClient::new(config);

    client.connect().await;
    wait_for_connection(&client).await?;

    if push_to_talk {
        // Press/release is a UI gesture; a console operator just streams.
        info!("push_to_talk is enabled; recording continuously anyway");
    }
    client.start_recording().await;

    info!("Streaming microphone audio; press Ctrl+C to stop");

    // Print transcripts until the link drops or a shutdown signal arrives
    tokio::select! {
        _ = print_transcripts(&client) => {
            error!("Connection lost; see debug log below");
            dump_debug_log(&client);
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping session...");
        }
    }

    client.stop_recording().await;
    client.disconnect().await;

    let stats = client.stats();
    info!(
        "Session closed: {} frames sent ({} bytes), {} transcripts received, {} frames dropped",
        stats.frames_sent, stats.audio_bytes_sent, stats.transcripts_received, stats.frames_dropped
    );

    Ok(())
}

/// Initialize the tracing (logging) system for the binary.
///
/// Reads `RUST_LOG` from the environment; if not set, defaults to debug
/// output for this crate and info for the rest.
fn init_tracing() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_chat_client=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Block until the session reports `Connected`.
///
/// Connection completion is observed through the status watch channel, not
/// through `connect()`'s return value. A session that was dialing and falls
/// back to `Disconnected` (or reports `Error`) failed to connect.
async fn wait_for_connection(client: &VoiceChatClient) -> Result<()> {
    let mut status = client.status_watch();
    let mut dialing = false;

    loop {
        match *status.borrow_and_update() {
            ConnectionStatus::Connected => return Ok(()),
            ConnectionStatus::Error => break,
            ConnectionStatus::Disconnected if dialing => break,
            _ => {}
        }
        if status.changed().await.is_err() {
            anyhow::bail!("session task ended unexpectedly");
        }
        // Any status change past this point means the connect was acted on,
        // so a later Disconnected is a failed attempt, not the initial state.
        dialing = true;
    }

    dump_debug_log(client);
    anyhow::bail!("failed to connect to the speech backend")
}

/// Print each sealed transcript exactly once, until the session leaves
/// `Connected`.
///
/// The conversation log is an append-only snapshot, so remembering how many
/// entries have been printed is enough to find the new ones.
async fn print_transcripts(client: &VoiceChatClient) {
    let mut printed = 0;

    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;

        let messages = client.messages();
        for message in &messages[printed.min(messages.len())..] {
            println!(
                "[{}] {:?}: {}",
                message.timestamp.format("%H:%M:%S"),
                message.role,
                message.text
            );
        }
        printed = messages.len();

        if client.status() != ConnectionStatus::Connected {
            return;
        }
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), whichever comes first.
async fn wait_for_shutdown() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("Failed to install SIGTERM handler");
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("Failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }
}

/// Dump the telemetry ring to the console, oldest first.
fn dump_debug_log(client: &VoiceChatClient) {
    for entry in client.debug_logs() {
        println!(
            "[{}] {}: {}",
            entry.timestamp.format("%H:%M:%S%.3f"),
            entry.level.as_str(),
            entry.message
        );
    }
}
