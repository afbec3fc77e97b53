//! # Configuration Management
//!
//! Loads and validates client configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_URL, APP_AUDIO_SAMPLE_RATE, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! The configuration is constructor-injected into the session and is
//! read-only to the core: values are captured when a connection is opened,
//! and changing them afterwards never retroactively alters a live link; a
//! reconnect is required for new values to take effect.

use serde::{Deserialize, Serialize};
use std::env;

use crate::error::{VoiceError, VoiceResult};

/// Main client configuration containing all settings.
///
/// Broken into logical groups (server, audio, voice, stream) so each
/// component reads only the section it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server: ServerSettings,
    pub audio: AudioSettings,
    pub voice: VoiceSettings,
    pub stream: StreamSettings,
}

/// Speech backend endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// WebSocket URL of the speech backend (ws:// or wss://)
    pub url: String,
}

/// Audio format settings, read by the capture device and the handshake.
///
/// ## Supported values:
/// - `sample_rate`: 16000, 24000, or 48000 Hz
/// - `channels`: 1 (mono) or 2 (stereo)
/// - `bit_depth`: 16 (the wire framing carries 16-bit PCM only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u8,
    pub bit_depth: u8,

    /// Duration of each captured PCM frame in milliseconds (10-60ms).
    /// Shorter frames lower latency; longer frames lower overhead.
    pub frame_duration_ms: u32,
}

/// Voice interaction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSettings {
    /// Voice the backend should synthesize responses with
    pub selected_voice: String,

    /// Target language for transcription (ISO 639-1 code like "en", "es")
    pub selected_language: String,

    /// Push-to-talk mode: recording is active only while an input is held
    pub push_to_talk: bool,

    /// Minimum interval between accepted push-to-talk presses (milliseconds)
    pub push_to_talk_debounce_ms: u64,
}

/// Streaming behavior tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// How many out-of-order inbound audio frames to hold for reordering.
    /// Frames arriving later than this window are dropped, never fatal.
    pub jitter_window: u32,

    /// Capacity of the outbound write queue, in frames. Writes beyond a
    /// full queue are dropped with a warning rather than blocking capture.
    pub outbound_queue: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                url: "ws://127.0.0.1:8080/ws/audio".to_string(),
            },
            audio: AudioSettings {
                sample_rate: 24000, // Matches the backend's synthesis rate
                channels: 1,        // Mono microphone input
                bit_depth: 16,      // 16-bit PCM
                frame_duration_ms: 20,
            },
            voice: VoiceSettings {
                selected_voice: "default".to_string(),
                selected_language: "en".to_string(),
                push_to_talk: false,
                push_to_talk_debounce_ms: 150,
            },
            stream: StreamSettings {
                jitter_window: 8, // ~160ms of reordering at 20ms frames
                outbound_queue: 64,
            },
        }
    }
}

impl ClientConfig {
    /// Load configuration from defaults, config.toml, and environment.
    ///
    /// ## Loading process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle the VOICE_SERVER_URL convenience variable
    pub fn load() -> VoiceResult<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&ClientConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment shorthand that doesn't follow the APP_ prefix convention
        if let Ok(url) = env::var("VOICE_SERVER_URL") {
            settings = settings.set_override("server.url", url)?;
        }

        let config: ClientConfig = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server URL parses and uses a ws:// or wss:// scheme with a host
    /// - Sample rate, channel count, and bit depth are supported values
    /// - Frame duration and queue sizes are within working ranges
    ///
    /// Validation runs before every connection attempt; an invalid
    /// configuration is rejected without opening a socket.
    pub fn validate(&self) -> VoiceResult<()> {
        let url = url::Url::parse(&self.server.url)?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(VoiceError::Configuration(format!(
                    "server URL scheme must be ws or wss, got '{}'",
                    other
                )));
            }
        }

        if url.host_str().is_none() {
            return Err(VoiceError::Configuration(
                "server URL has no host".to_string(),
            ));
        }

        if !matches!(self.audio.sample_rate, 16000 | 24000 | 48000) {
            return Err(VoiceError::Configuration(format!(
                "unsupported sample rate {} (expected 16000, 24000, or 48000)",
                self.audio.sample_rate
            )));
        }

        if !matches!(self.audio.channels, 1 | 2) {
            return Err(VoiceError::Configuration(format!(
                "unsupported channel count {} (expected 1 or 2)",
                self.audio.channels
            )));
        }

        if self.audio.bit_depth != 16 {
            return Err(VoiceError::Configuration(format!(
                "unsupported bit depth {} (only 16-bit PCM is supported)",
                self.audio.bit_depth
            )));
        }

        if !(10..=60).contains(&self.audio.frame_duration_ms) {
            return Err(VoiceError::Configuration(format!(
                "frame duration {}ms outside supported range 10-60ms",
                self.audio.frame_duration_ms
            )));
        }

        if self.stream.jitter_window == 0 {
            return Err(VoiceError::Configuration(
                "jitter window must be at least 1 frame".to_string(),
            ));
        }

        if self.stream.outbound_queue == 0 {
            return Err(VoiceError::Configuration(
                "outbound queue capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The default configuration must always pass validation.
    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.audio.sample_rate, 24000);
        assert_eq!(config.audio.channels, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_url_scheme() {
        let mut config = ClientConfig::default();
        config.server.url = "https://example.com/ws".to_string();
        let err = config.validate().unwrap_err();
        assert_eq!(err.as_code(), "configuration_error");
    }

    #[test]
    fn test_rejects_unparseable_url() {
        let mut config = ClientConfig::default();
        config.server.url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unsupported_sample_rate() {
        let mut config = ClientConfig::default();
        config.audio.sample_rate = 44100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_16_bit_depth() {
        let mut config = ClientConfig::default();
        config.audio.bit_depth = 24;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_frame_duration() {
        let mut config = ClientConfig::default();
        config.audio.frame_duration_ms = 500;
        assert!(config.validate().is_err());
    }

    /// Configuration files are plain TOML mirroring the struct layout.
    #[test]
    fn test_parses_from_toml() {
        let toml_str = r#"
            [server]
            url = "wss://voice.example.com/ws"

            [audio]
            sample_rate = 16000
            channels = 1
            bit_depth = 16
            frame_duration_ms = 40

            [voice]
            selected_voice = "nova"
            selected_language = "fr"
            push_to_talk = true
            push_to_talk_debounce_ms = 200

            [stream]
            jitter_window = 4
            outbound_queue = 32
        "#;

        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.url, "wss://voice.example.com/ws");
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.voice.selected_voice, "nova");
        assert!(config.voice.push_to_talk);
        assert_eq!(config.stream.jitter_window, 4);
        assert!(config.validate().is_ok());
    }
}
