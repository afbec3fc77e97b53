//! # Voice Chat Client
//!
//! Real-time voice streaming client for a remote speech AI backend. Opens a
//! persistent duplex WebSocket, streams microphone audio outward in
//! near-real-time, reconstructs incremental transcript events inbound, and
//! exposes a clean session state machine to UI layers.
//!
//! ## Architecture:
//! - **config**: settings loading and validation (TOML file + environment)
//! - **error**: the client error taxonomy
//! - **protocol**: wire envelope, transcript reconstruction, jitter buffer
//! - **transport**: the WebSocket link and its lifecycle events
//! - **audio**: microphone capture and speaker playback device seams
//! - **session**: the state machine owning all session state
//! - **client**: `VoiceChatClient`, the public facade
//!
//! ## Quick start:
//! ```no_run
//! use voice_chat_client::{ClientConfig, VoiceChatClient};
//!
//! # async fn run() {
//! let config = ClientConfig::default();
//! let client = VoiceChatClient::new(config);
//! client.connect().await;
//! // observe client.status_watch() for the transition to Connected,
//! // then client.start_recording().await and read client.messages()
//! # }
//! ```

pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use client::VoiceChatClient;
pub use config::{AudioSettings, ClientConfig, ServerSettings, StreamSettings, VoiceSettings};
pub use error::{VoiceError, VoiceResult};
pub use protocol::Role;
pub use session::telemetry::{
    DebugLogEntry, LogData, LogLevel, SessionStats, VoiceMessage, DEBUG_RING_CAPACITY,
};
pub use session::{ConnectionStatus, SessionFlags};
