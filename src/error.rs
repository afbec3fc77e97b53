//! # Error Handling
//!
//! Defines the error taxonomy for the voice streaming client and how errors
//! are surfaced to callers and to the debug telemetry ring.
//!
//! ## Error Categories:
//! - **Configuration**: invalid settings (bad server URL, unsupported sample rate); rejected before a connection is attempted
//! - **Transport**: the socket failed to open or dropped mid-session; recoverable by a caller-initiated reconnect
//! - **Protocol**: a malformed or unexpected inbound frame; the frame is dropped and the session continues
//! - **Precondition**: an operation called in the wrong state (e.g. recording while disconnected); rejected with no state change
//!
//! ## Propagation policy:
//! No error leaves the core as a panic. Public methods either resolve
//! normally or fail into a logged, observable state change; the structured
//! error is captured into the telemetry ring with enough context to diagnose
//! without reproducing.

use std::fmt;

/// Custom error type for the voice streaming client.
///
/// Each variant carries a human-readable message; `as_code()` provides the
/// machine-readable tag used in telemetry entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    /// Settings are missing or invalid (checked before any connection attempt)
    Configuration(String),

    /// Socket-level failure: could not open, or dropped mid-session
    Transport(String),

    /// Malformed inbound frame, unknown message type, or sequence violation
    Protocol(String),

    /// Operation rejected because the session is in the wrong state
    Precondition(String),
}

impl VoiceError {
    /// Machine-readable error code for telemetry and log filtering.
    pub fn as_code(&self) -> &'static str {
        match self {
            VoiceError::Configuration(_) => "configuration_error",
            VoiceError::Transport(_) => "transport_error",
            VoiceError::Protocol(_) => "protocol_error",
            VoiceError::Precondition(_) => "precondition_error",
        }
    }
}

impl fmt::Display for VoiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            VoiceError::Transport(msg) => write!(f, "Transport error: {}", msg),
            VoiceError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            VoiceError::Precondition(msg) => write!(f, "Precondition error: {}", msg),
        }
    }
}

impl std::error::Error for VoiceError {}

/// JSON (de)serialization failures map to protocol errors.
///
/// The wire envelope is JSON; a frame that does not parse is the peer's
/// framing at fault, not our configuration.
impl From<serde_json::Error> for VoiceError {
    fn from(err: serde_json::Error) -> Self {
        VoiceError::Protocol(format!("JSON parsing error: {}", err))
    }
}

/// Configuration loading failures (bad config.toml, malformed env overrides).
impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Configuration(err.to_string())
    }
}

/// Server URL parse failures are configuration errors: they are detected
/// during validation, before a socket is ever opened.
impl From<url::ParseError> for VoiceError {
    fn from(err: url::ParseError) -> Self {
        VoiceError::Configuration(format!("invalid server URL: {}", err))
    }
}

/// Type alias for Results that use the client's error type.
pub type VoiceResult<T> = Result<T, VoiceError>;
