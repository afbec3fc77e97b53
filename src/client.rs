//! # Voice Chat Client Facade
//!
//! The public surface UI layers call. Every operation is a thin pass-through
//! onto the session's event channel, so callers never block on network or
//! device work: completion is observed through the reactive reads (`status`,
//! `flags`, `messages`, `debug_logs`), not through return values.
//!
//! Each client owns exactly one session task with constructor-injected
//! configuration; there is no global store. Dropping the client ends the
//! session.

use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio::capture::{CaptureDevice, CpalCaptureDevice};
use crate::audio::playback::{CpalPlaybackSink, PlaybackSink};
use crate::config::ClientConfig;
use crate::session::telemetry::{DebugLogEntry, MessageLog, SessionStats, TelemetryRing, VoiceMessage};
use crate::session::{self, ConnectionStatus, SessionCommand, SessionEvent, SessionFlags};
use crate::transport::{Connector, WsConnector};

/// Handle to one voice streaming session.
pub struct VoiceChatClient {
    events: mpsc::Sender<SessionEvent>,
    status_rx: watch::Receiver<ConnectionStatus>,
    flags_rx: watch::Receiver<SessionFlags>,
    messages: Arc<RwLock<MessageLog>>,
    telemetry: Arc<RwLock<TelemetryRing>>,
    stats: Arc<RwLock<SessionStats>>,
    task: JoinHandle<()>,

    /// Push-to-talk debounce state (facade-level; the state machine is
    /// agnostic to the caller's press/release pattern)
    debounce: Duration,
    last_press: Mutex<Option<Instant>>,
}

impl VoiceChatClient {
    /// Create a client backed by the platform microphone, speaker, and a
    /// real WebSocket connector. Must be called within a tokio runtime.
    pub fn new(config: ClientConfig) -> Self {
        let playback = CpalPlaybackSink::new(config.audio.sample_rate, config.audio.channels);
        Self::with_parts(
            config,
            Box::new(WsConnector),
            Box::new(CpalCaptureDevice::new()),
            Box::new(playback),
        )
    }

    /// Assemble a client from explicit parts (used by tests to substitute
    /// scripted devices and links).
    pub(crate) fn with_parts(
        config: ClientConfig,
        connector: Box<dyn Connector>,
        capture: Box<dyn CaptureDevice>,
        playback: Box<dyn PlaybackSink>,
    ) -> Self {
        let debounce = Duration::from_millis(config.voice.push_to_talk_debounce_ms);
        let handles = session::spawn(config, connector, capture, playback);

        Self {
            events: handles.events,
            status_rx: handles.status_rx,
            flags_rx: handles.flags_rx,
            messages: handles.messages,
            telemetry: handles.telemetry,
            stats: handles.stats,
            task: handles.task,
            debounce,
            last_press: Mutex::new(None),
        }
    }

    // ---- operations -----------------------------------------------------

    /// Open a connection to the configured backend. Idempotent while a
    /// connection exists; completion is observed via `status_watch()`.
    pub async fn connect(&self) {
        self.command(SessionCommand::Connect).await;
    }

    /// Tear the session down. Always safe, including when already
    /// disconnected; cancels an in-flight connect and halts recording.
    pub async fn disconnect(&self) {
        self.command(SessionCommand::Disconnect).await;
    }

    /// Arm the microphone. Requires a connected session; otherwise an error
    /// entry is logged and nothing changes.
    pub async fn start_recording(&self) {
        self.command(SessionCommand::StartRecording).await;
    }

    /// Disarm the microphone. Safe to call when not recording.
    pub async fn stop_recording(&self) {
        self.command(SessionCommand::StopRecording).await;
    }

    /// Push-to-talk press: debounced start of recording.
    pub async fn press(&self) {
        {
            let mut last = self.last_press.lock().unwrap();
            let now = Instant::now();
            if let Some(previous) = *last {
                if now.duration_since(previous) < self.debounce {
                    tracing::debug!("push-to-talk press debounced");
                    return;
                }
            }
            *last = Some(now);
        }
        self.start_recording().await;
    }

    /// Push-to-talk release: stop recording.
    pub async fn release(&self) {
        self.stop_recording().await;
    }

    /// Send a typed text message into the conversation. Text and voice are
    /// independent channels: this does not require recording, only a
    /// connected session.
    pub async fn send_message(&self, text: impl Into<String>) {
        self.command(SessionCommand::SendText(text.into())).await;
    }

    /// Select the response voice: applied live when connected, otherwise on
    /// the next connect.
    pub async fn set_voice(&self, voice: impl Into<String>) {
        self.command(SessionCommand::SetVoice(voice.into())).await;
    }

    /// Select the transcription language: applied live when connected,
    /// otherwise on the next connect.
    pub async fn set_language(&self, language: impl Into<String>) {
        self.command(SessionCommand::SetLanguage(language.into())).await;
    }

    /// Empty the conversation log. Independent of connection state.
    pub async fn clear_messages(&self) {
        self.command(SessionCommand::ClearMessages).await;
    }

    /// Empty the telemetry ring. Independent of connection state.
    pub async fn clear_debug_logs(&self) {
        self.command(SessionCommand::ClearDebugLogs).await;
    }

    // ---- reactive reads -------------------------------------------------

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Watch channel for connection status changes.
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    pub fn flags(&self) -> SessionFlags {
        *self.flags_rx.borrow()
    }

    /// Watch channel for recording/listening flag changes.
    pub fn flags_watch(&self) -> watch::Receiver<SessionFlags> {
        self.flags_rx.clone()
    }

    /// Snapshot of the sealed conversation turns, oldest first.
    pub fn messages(&self) -> Vec<VoiceMessage> {
        self.messages.read().unwrap().snapshot()
    }

    /// Snapshot of the telemetry ring, oldest first.
    pub fn debug_logs(&self) -> Vec<DebugLogEntry> {
        self.telemetry.read().unwrap().snapshot()
    }

    /// Snapshot of the session traffic counters.
    pub fn stats(&self) -> SessionStats {
        *self.stats.read().unwrap()
    }

    async fn command(&self, command: SessionCommand) {
        if self.events.send(SessionEvent::Command(command)).await.is_err() {
            tracing::warn!("session task is gone; command dropped");
        }
    }
}

impl Drop for VoiceChatClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::audio::capture::testing::ScriptedCapture;
    use crate::audio::playback::testing::RecordingSink;
    use crate::session::telemetry::LogLevel;
    use crate::transport::testing::FakeConnector;
    use crate::transport::TransportEvent;

    async fn connected_client() -> VoiceChatClient {
        let connector = FakeConnector::new();
        let links = connector.links();
        let client = VoiceChatClient::with_parts(
            ClientConfig::default(),
            Box::new(connector),
            Box::new(ScriptedCapture::new(Vec::new())),
            Box::new(RecordingSink::new()),
        );

        client.connect().await;
        timeout(Duration::from_secs(1), async {
            while links.lock().unwrap().is_empty() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("link never spawned");

        let link = std::sync::Arc::clone(&links.lock().unwrap()[0]);
        link.push(TransportEvent::Opened).await;

        let mut status = client.status_watch();
        timeout(Duration::from_secs(1), async {
            while *status.borrow_and_update() != ConnectionStatus::Connected {
                status.changed().await.unwrap();
            }
        })
        .await
        .expect("never connected");

        client
    }

    #[tokio::test]
    async fn test_push_to_talk_press_is_debounced() {
        let client = connected_client().await;

        client.press().await;
        client.press().await; // within the debounce interval: ignored

        let mut flags = client.flags_watch();
        timeout(Duration::from_secs(1), async {
            while !flags.borrow_and_update().is_recording {
                flags.changed().await.unwrap();
            }
        })
        .await
        .expect("recording never started");

        sleep(Duration::from_millis(50)).await;
        let logs = client.debug_logs();
        let starts = logs
            .iter()
            .filter(|entry| entry.message == "recording started")
            .count();
        let repeats = logs
            .iter()
            .filter(|entry| entry.level == LogLevel::Warn && entry.message == "already recording")
            .count();
        assert_eq!(starts, 1);
        assert_eq!(repeats, 0, "debounce must swallow the second press");

        client.release().await;
        timeout(Duration::from_secs(1), async {
            while flags.borrow_and_update().is_recording {
                flags.changed().await.unwrap();
            }
        })
        .await
        .expect("recording never stopped");
    }

    #[tokio::test]
    async fn test_snapshots_are_readable_while_disconnected() {
        let client = VoiceChatClient::with_parts(
            ClientConfig::default(),
            Box::new(FakeConnector::new()),
            Box::new(ScriptedCapture::new(Vec::new())),
            Box::new(RecordingSink::new()),
        );

        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert!(!client.flags().is_recording);
        assert!(client.messages().is_empty());
        assert!(client.debug_logs().is_empty());
        assert_eq!(client.stats().frames_sent, 0);
    }
}
