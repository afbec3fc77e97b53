//! # Session State Machine
//!
//! Owns everything a voice session is: connection status, recording flags,
//! the conversation log, the telemetry ring, and the traffic counters. All
//! of it is mutated from exactly one place, the event loop in this module,
//! which consumes a single `SessionEvent` channel fed by three producers:
//!
//! 1. **Caller commands** (connect, record, send, clear) from the facade
//! 2. **Transport events** from the WebSocket task, tagged with the session
//!    generation that produced them
//! 3. **Captured audio frames** from the microphone thread, tagged with the
//!    capture epoch that produced them
//!
//! ## Session Lifecycle:
//! `Disconnected → Connecting → Connected → Disconnected | Error`, with
//! recording valid only while `Connected`.
//!
//! ## Staleness fencing:
//! Each `connect()` increments the generation; each arm/disarm increments
//! the capture epoch. Events carrying an old tag are discarded before they
//! can touch state, so a superseded transport or a microphone callback
//! racing a stop can never corrupt the session.

pub mod telemetry;

use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::audio::capture::CaptureDevice;
use crate::audio::frame::{self, FrameSpec};
use crate::audio::playback::PlaybackSink;
use crate::config::ClientConfig;
use crate::error::VoiceError;
use crate::protocol::{
    ClientMessage, JitterBuffer, Outbound, ServerMessage, TranscriptAssembler,
};
use crate::session::telemetry::{
    DebugLogEntry, LogData, LogLevel, MessageLog, SessionStats, TelemetryRing,
};
use crate::transport::{Connector, TransportEvent, TransportHandle};

/// Capacity of the session event channel. Sized to absorb a burst of
/// microphone frames without blocking the audio callback.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Connection status of a session. Exactly one value at any instant; the
/// state machine is the only mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        }
    }
}

/// Recording/listening flags published alongside the connection status.
///
/// Invariant: `is_recording` implies the status is `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionFlags {
    pub is_recording: bool,
    pub is_listening: bool,
    pub push_to_talk: bool,
}

/// Caller-initiated operations, delivered through the event channel so they
/// serialize with transport and capture events.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Connect,
    Disconnect,
    StartRecording,
    StopRecording,
    SendText(String),
    SetVoice(String),
    SetLanguage(String),
    ClearMessages,
    ClearDebugLogs,
}

/// The single inbound event type the state machine loop consumes.
#[derive(Debug)]
pub enum SessionEvent {
    Command(SessionCommand),
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    Capture {
        epoch: u64,
        samples: Vec<i16>,
    },
}

/// Everything the facade holds onto after spawning a session.
pub(crate) struct SessionHandles {
    pub events: mpsc::Sender<SessionEvent>,
    pub status_rx: watch::Receiver<ConnectionStatus>,
    pub flags_rx: watch::Receiver<SessionFlags>,
    pub messages: Arc<RwLock<MessageLog>>,
    pub telemetry: Arc<RwLock<TelemetryRing>>,
    pub stats: Arc<RwLock<SessionStats>>,
    pub task: tokio::task::JoinHandle<()>,
}

/// Spawn a session task around the given devices and return the handles the
/// facade needs. The task runs until the owning client is dropped.
pub(crate) fn spawn(
    config: ClientConfig,
    connector: Box<dyn Connector>,
    capture: Box<dyn CaptureDevice>,
    playback: Box<dyn PlaybackSink>,
) -> SessionHandles {
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
    let (flags_tx, flags_rx) = watch::channel(SessionFlags {
        is_recording: false,
        is_listening: false,
        push_to_talk: config.voice.push_to_talk,
    });

    let messages = Arc::new(RwLock::new(MessageLog::new()));
    let telemetry = Arc::new(RwLock::new(TelemetryRing::default()));
    let stats = Arc::new(RwLock::new(SessionStats::default()));

    let jitter_window = config.stream.jitter_window;
    let machine = SessionStateMachine {
        session_id: Uuid::new_v4().to_string(),
        config,
        connector,
        capture,
        playback,
        events_tx: events_tx.clone(),
        status_tx,
        flags_tx,
        messages: Arc::clone(&messages),
        telemetry: Arc::clone(&telemetry),
        stats: Arc::clone(&stats),
        transport: None,
        generation: 0,
        capture_epoch: 0,
        outbound_seq: 0,
        assembler: TranscriptAssembler::new(),
        jitter: JitterBuffer::new(jitter_window),
    };

    let task = tokio::spawn(machine.run(events_rx));

    SessionHandles {
        events: events_tx,
        status_rx,
        flags_rx,
        messages,
        telemetry,
        stats,
        task,
    }
}

/// The state machine proper. Never shared: the run loop has exclusive
/// ownership, so no field here needs a lock.
struct SessionStateMachine {
    session_id: String,
    config: ClientConfig,
    connector: Box<dyn Connector>,
    capture: Box<dyn CaptureDevice>,
    playback: Box<dyn PlaybackSink>,

    /// Clone handed to transports and the capture device.
    events_tx: mpsc::Sender<SessionEvent>,

    status_tx: watch::Sender<ConnectionStatus>,
    flags_tx: watch::Sender<SessionFlags>,
    messages: Arc<RwLock<MessageLog>>,
    telemetry: Arc<RwLock<TelemetryRing>>,
    stats: Arc<RwLock<SessionStats>>,

    transport: Option<TransportHandle>,

    /// Bumped on every connect and disconnect; transport events carrying an
    /// older value are discarded.
    generation: u64,

    /// Bumped on every arm and disarm; capture frames carrying an older
    /// value are discarded.
    capture_epoch: u64,

    /// Outbound audio sequence, restarted per connection.
    outbound_seq: u32,

    assembler: TranscriptAssembler,
    jitter: JitterBuffer,
}

impl SessionStateMachine {
    async fn run(mut self, mut events_rx: mpsc::Receiver<SessionEvent>) {
        while let Some(event) = events_rx.recv().await {
            self.dispatch(event);
        }
    }

    fn dispatch(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Command(command) => self.handle_command(command),
            SessionEvent::Transport { generation, event } => {
                if generation != self.generation || self.transport.is_none() {
                    tracing::debug!(
                        generation,
                        current = self.generation,
                        "discarding stale transport event"
                    );
                    return;
                }
                self.handle_transport_event(event);
            }
            SessionEvent::Capture { epoch, samples } => self.handle_capture(epoch, samples),
        }
    }

    // ---- commands -------------------------------------------------------

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect => self.handle_connect(),
            SessionCommand::Disconnect => self.handle_disconnect(),
            SessionCommand::StartRecording => self.handle_start_recording(),
            SessionCommand::StopRecording => self.handle_stop_recording(),
            SessionCommand::SendText(text) => self.handle_send_text(text),
            SessionCommand::SetVoice(voice) => self.handle_set_voice(voice),
            SessionCommand::SetLanguage(language) => self.handle_set_language(language),
            SessionCommand::ClearMessages => {
                self.messages.write().unwrap().clear();
                self.log(LogLevel::Info, "message log cleared", None);
            }
            SessionCommand::ClearDebugLogs => {
                self.telemetry.write().unwrap().clear();
                tracing::debug!("telemetry ring cleared");
            }
        }
    }

    fn handle_connect(&mut self) {
        let status = self.status();
        if matches!(
            status,
            ConnectionStatus::Connecting | ConnectionStatus::Connected
        ) {
            self.log(
                LogLevel::Warn,
                format!("connect ignored; already {}", status.as_str()),
                None,
            );
            return;
        }

        // Invalid settings never reach the network.
        if let Err(err) = self.config.validate() {
            self.log(
                LogLevel::Error,
                err.to_string(),
                Some(LogData::Opaque {
                    text: err.as_code().to_string(),
                }),
            );
            self.set_status(ConnectionStatus::Error);
            self.set_status(ConnectionStatus::Disconnected);
            return;
        }

        self.generation += 1;
        self.outbound_seq = 0;

        let handle = self.connector.connect(
            &self.config.server.url,
            self.generation,
            self.events_tx.clone(),
            self.config.stream.outbound_queue,
        );
        self.transport = Some(handle);
        self.set_status(ConnectionStatus::Connecting);
        self.log(
            LogLevel::Info,
            format!("connecting to {}", self.config.server.url),
            Some(LogData::Transport {
                detail: "dialing".to_string(),
            }),
        );
    }

    fn handle_disconnect(&mut self) {
        let idle = self.status() == ConnectionStatus::Disconnected
            && self.transport.is_none()
            && !self.flags_tx.borrow().is_recording;
        if idle {
            tracing::debug!("disconnect ignored; already disconnected");
            return;
        }

        self.halt_streaming();
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        // Fence any event still in flight from the old link
        self.generation += 1;
        self.set_status(ConnectionStatus::Disconnected);
        self.log(
            LogLevel::Info,
            "disconnected",
            Some(LogData::Transport {
                detail: "closed by client".to_string(),
            }),
        );
    }

    fn handle_start_recording(&mut self) {
        let status = self.status();
        if status != ConnectionStatus::Connected {
            let err = VoiceError::Precondition(format!(
                "cannot start recording while {}",
                status.as_str()
            ));
            self.log(
                LogLevel::Error,
                err.to_string(),
                Some(LogData::Opaque {
                    text: err.as_code().to_string(),
                }),
            );
            return;
        }

        if self.flags_tx.borrow().is_recording {
            self.log(LogLevel::Warn, "already recording", None);
            return;
        }

        self.capture_epoch += 1;
        let spec = FrameSpec::from_settings(&self.config.audio);
        match self
            .capture
            .arm(self.capture_epoch, spec, self.events_tx.clone())
        {
            Ok(()) => {
                self.flags_tx.send_modify(|flags| {
                    flags.is_recording = true;
                    flags.is_listening = true;
                });
                self.log(LogLevel::Success, "recording started", None);
            }
            Err(err) => {
                self.log(
                    LogLevel::Error,
                    format!("failed to arm microphone: {}", err),
                    Some(LogData::Opaque {
                        text: err.as_code().to_string(),
                    }),
                );
            }
        }
    }

    fn handle_stop_recording(&mut self) {
        if !self.flags_tx.borrow().is_recording {
            // Callers may race a stop against a disconnect; that's benign
            self.log(
                LogLevel::Warn,
                "stop recording ignored; not currently recording",
                None,
            );
            return;
        }

        self.capture.disarm();
        self.capture_epoch += 1;
        self.flags_tx.send_modify(|flags| {
            flags.is_recording = false;
            flags.is_listening = false;
        });
        self.log(LogLevel::Info, "recording stopped", None);
    }

    fn handle_send_text(&mut self, text: String) {
        if self.status() != ConnectionStatus::Connected || self.transport.is_none() {
            let err = VoiceError::Precondition(format!(
                "cannot send message while {}",
                self.status().as_str()
            ));
            self.log(
                LogLevel::Error,
                err.to_string(),
                Some(LogData::Opaque {
                    text: err.as_code().to_string(),
                }),
            );
            return;
        }

        if let Some(transport) = &self.transport {
            transport.send(Outbound::Control(ClientMessage::Text { text }));
            self.log(
                LogLevel::Info,
                "text message queued",
                Some(LogData::Protocol {
                    message_type: "text".to_string(),
                }),
            );
        }
    }

    fn handle_set_voice(&mut self, voice: String) {
        self.config.voice.selected_voice = voice.clone();
        if self.status() == ConnectionStatus::Connected {
            if let Some(transport) = &self.transport {
                transport.send(Outbound::Control(ClientMessage::SetVoice {
                    voice: voice.clone(),
                }));
            }
            self.log(LogLevel::Info, format!("voice set to {} (live)", voice), None);
        } else {
            self.log(
                LogLevel::Info,
                format!("voice set to {}; applied on next connect", voice),
                None,
            );
        }
    }

    fn handle_set_language(&mut self, language: String) {
        self.config.voice.selected_language = language.clone();
        if self.status() == ConnectionStatus::Connected {
            if let Some(transport) = &self.transport {
                transport.send(Outbound::Control(ClientMessage::SetLanguage {
                    language: language.clone(),
                }));
            }
            self.log(
                LogLevel::Info,
                format!("language set to {} (live)", language),
                None,
            );
        } else {
            self.log(
                LogLevel::Info,
                format!("language set to {}; applied on next connect", language),
                None,
            );
        }
    }

    // ---- transport events ----------------------------------------------

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.handle_opened(),
            TransportEvent::Message(message) => self.handle_server_message(message),
            TransportEvent::Audio(chunk) => self.handle_inbound_audio(chunk.sequence, chunk.samples),
            TransportEvent::DecodeError(detail) => {
                self.stats.write().unwrap().protocol_errors += 1;
                self.log(
                    LogLevel::Warn,
                    format!("malformed inbound frame dropped: {}", detail),
                    Some(LogData::Opaque { text: detail }),
                );
            }
            TransportEvent::Failed(reason) => {
                // is_recording implies Connected: capture must be disarmed
                // before the status leaves that state.
                self.halt_streaming();
                self.log(
                    LogLevel::Error,
                    format!("connection failed: {}", reason),
                    Some(LogData::Transport { detail: reason }),
                );
                self.set_status(ConnectionStatus::Error);
            }
            TransportEvent::Closed { reason } => self.handle_closed(reason),
        }
    }

    fn handle_opened(&mut self) {
        if self.status() != ConnectionStatus::Connecting {
            tracing::debug!("open event in unexpected state, ignoring");
            return;
        }

        self.set_status(ConnectionStatus::Connected);
        self.log(
            LogLevel::Success,
            format!("connected to {}", self.config.server.url),
            Some(LogData::Transport {
                detail: "open".to_string(),
            }),
        );

        let handshake = ClientMessage::Handshake {
            session_id: self.session_id.clone(),
            voice: self.config.voice.selected_voice.clone(),
            language: self.config.voice.selected_language.clone(),
            sample_rate: self.config.audio.sample_rate,
            channels: self.config.audio.channels,
            bit_depth: self.config.audio.bit_depth,
        };
        if let Some(transport) = &self.transport {
            transport.send(Outbound::Control(handshake));
        }
    }

    fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::PartialTranscript { message_id, text } => {
                self.assembler.apply_partial(&message_id, text);
                self.log(
                    LogLevel::Info,
                    format!("partial transcript for {}", message_id),
                    Some(LogData::Protocol {
                        message_type: "partial_transcript".to_string(),
                    }),
                );
            }
            ServerMessage::FinalTranscript {
                message_id,
                role,
                text,
            } => {
                let sealed = self.assembler.seal(&message_id, role, text);
                let appended = self
                    .messages
                    .write()
                    .unwrap()
                    .append(sealed.role, sealed.text);
                self.stats.write().unwrap().transcripts_received += 1;
                self.log(
                    LogLevel::Success,
                    format!("transcript sealed as {}", appended.id),
                    Some(LogData::Protocol {
                        message_type: "final_transcript".to_string(),
                    }),
                );
            }
            ServerMessage::Error { code, detail } => {
                self.log(
                    LogLevel::Error,
                    format!("server error {}: {}", code, detail),
                    Some(LogData::Protocol {
                        message_type: "error".to_string(),
                    }),
                );
            }
            ServerMessage::Ping { timestamp } => {
                if let Some(transport) = &self.transport {
                    transport.send(Outbound::Control(ClientMessage::Pong { timestamp }));
                }
                self.log(
                    LogLevel::Info,
                    "heartbeat answered",
                    Some(LogData::Protocol {
                        message_type: "ping".to_string(),
                    }),
                );
            }
        }
    }

    fn handle_inbound_audio(&mut self, sequence: u32, samples: Vec<i16>) {
        let output = self.jitter.push(sequence, samples);

        if let Some(late) = output.late {
            self.stats.write().unwrap().frames_dropped += 1;
            self.log(
                LogLevel::Warn,
                format!("audio frame {} outside jitter window, dropped", late),
                Some(LogData::Audio { sequence: late }),
            );
        }
        for skipped in &output.skipped {
            self.stats.write().unwrap().frames_dropped += 1;
            self.log(
                LogLevel::Warn,
                format!("audio frame {} lost, playback skipped ahead", skipped),
                Some(LogData::Audio { sequence: *skipped }),
            );
        }
        for (_sequence, samples) in output.ready {
            self.playback.play(samples);
        }
    }

    fn handle_closed(&mut self, reason: Option<String>) {
        self.halt_streaming();
        self.transport = None;

        let detail = reason.unwrap_or_else(|| "link closed".to_string());
        if self.status() == ConnectionStatus::Error {
            // The failure itself was already logged at Error level
            self.log(
                LogLevel::Info,
                "session closed after failure",
                Some(LogData::Transport {
                    detail: detail.clone(),
                }),
            );
        } else {
            self.log(
                LogLevel::Warn,
                format!("connection closed: {}", detail),
                Some(LogData::Transport {
                    detail: detail.clone(),
                }),
            );
        }
        self.set_status(ConnectionStatus::Disconnected);
    }

    // ---- captured audio -------------------------------------------------

    fn handle_capture(&mut self, epoch: u64, samples: Vec<i16>) {
        if epoch != self.capture_epoch || !self.flags_tx.borrow().is_recording {
            tracing::trace!(epoch, current = self.capture_epoch, "discarding stale frame");
            return;
        }

        if frame::validate_frame(&samples).is_err() {
            self.log(LogLevel::Warn, "empty captured frame dropped", None);
            return;
        }

        let Some(transport) = &self.transport else {
            return;
        };

        self.outbound_seq += 1;
        {
            let mut stats = self.stats.write().unwrap();
            stats.frames_sent += 1;
            stats.audio_bytes_sent += (samples.len() * 2) as u64;
        }
        transport.send(Outbound::Audio {
            sequence: self.outbound_seq,
            samples,
        });
    }

    // ---- shared plumbing ------------------------------------------------

    /// Stop capture and playback and forget per-connection codec state.
    /// Used by disconnect and by any transport close.
    fn halt_streaming(&mut self) {
        if self.flags_tx.borrow().is_recording {
            self.capture.disarm();
        }
        self.capture_epoch += 1;
        self.flags_tx.send_modify(|flags| {
            flags.is_recording = false;
            flags.is_listening = false;
        });
        self.playback.stop();
        self.jitter.reset();
        self.assembler = TranscriptAssembler::new();
    }

    fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    fn set_status(&self, status: ConnectionStatus) {
        if self.status() == status {
            return;
        }
        self.status_tx.send_replace(status);
    }

    /// Record an entry in the telemetry ring and mirror it to tracing.
    fn log(&self, level: LogLevel, message: impl Into<String>, data: Option<LogData>) {
        let message = message.into();
        match level {
            LogLevel::Info | LogLevel::Success => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
        self.telemetry
            .write()
            .unwrap()
            .push(DebugLogEntry::new(level, message, data));
    }
}
