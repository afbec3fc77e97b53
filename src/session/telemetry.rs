//! # Session Records
//!
//! The two append-only records a session keeps, plus its counters:
//!
//! - **MessageLog**: sealed conversation turns in arrival order. Entries are
//!   immutable once appended; partial transcripts never appear here.
//! - **TelemetryRing**: a bounded circular buffer of structured log entries
//!   describing every state transition and protocol event, for operator
//!   diagnosis. Insertion beyond capacity evicts the oldest entry.
//! - **SessionStats**: running counters for traffic and drops.
//!
//! Both records outlive any single connection: disconnecting never clears
//! them, and clearing them never disconnects.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::Role;

/// Telemetry ring capacity: the last N entries are kept.
pub const DEBUG_RING_CAPACITY: usize = 100;

/// Severity of a telemetry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Success => "success",
        }
    }
}

/// Structured diagnostic payload attached to a telemetry entry.
///
/// Known shapes are tagged per log source; anything unstructured falls back
/// to `Opaque` text rather than a free-form value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogData {
    /// Link-level detail (status changes, close reasons, error codes)
    Transport { detail: String },

    /// Which protocol message kind triggered the entry
    Protocol { message_type: String },

    /// Audio pipeline detail keyed by wire sequence number
    Audio { sequence: u32 },

    /// Unstructured fallback
    Opaque { text: String },
}

/// One structured entry in the telemetry ring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugLogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub data: Option<LogData>,
}

impl DebugLogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>, data: Option<LogData>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Bounded FIFO of telemetry entries.
#[derive(Debug)]
pub struct TelemetryRing {
    entries: VecDeque<DebugLogEntry>,
    capacity: usize,
}

impl TelemetryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, evicting the oldest once past capacity.
    pub fn push(&mut self, entry: DebugLogEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Copy of the current entries, oldest first.
    pub fn snapshot(&self) -> Vec<DebugLogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for TelemetryRing {
    fn default() -> Self {
        Self::new(DEBUG_RING_CAPACITY)
    }
}

/// One sealed conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceMessage {
    /// Log-assigned id, unique and lexicographically ordered by arrival
    pub id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only record of sealed conversation turns.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<VoiceMessage>,
    next_seq: u64,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seal a turn into the log, assigning its id and timestamp.
    pub fn append(&mut self, role: Role, text: String) -> VoiceMessage {
        self.next_seq += 1;
        let message = VoiceMessage {
            id: format!("msg-{:06}", self.next_seq),
            role,
            text,
            timestamp: Utc::now(),
        };
        self.entries.push(message.clone());
        message
    }

    pub fn snapshot(&self) -> Vec<VoiceMessage> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Empty the log. Ids keep counting up so cleared and live entries can
    /// never collide.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Running traffic counters for one session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Audio frames handed to the transport
    pub frames_sent: u64,

    /// PCM bytes handed to the transport
    pub audio_bytes_sent: u64,

    /// Sealed transcript turns received
    pub transcripts_received: u64,

    /// Inbound audio frames dropped or skipped by the jitter window
    pub frames_dropped: u64,

    /// Malformed or unexpected inbound frames
    pub protocol_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: usize) -> DebugLogEntry {
        DebugLogEntry::new(LogLevel::Info, format!("entry {}", n), None)
    }

    /// Appending 150 entries to a capacity-100 ring keeps exactly the last
    /// 100, oldest evicted first.
    #[test]
    fn test_ring_evicts_oldest_beyond_capacity() {
        let mut ring = TelemetryRing::new(100);
        for n in 0..150 {
            ring.push(entry(n));
        }

        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), 100);
        assert_eq!(snapshot[0].message, "entry 50");
        assert_eq!(snapshot[99].message, "entry 149");
    }

    #[test]
    fn test_ring_clear_resets_to_empty() {
        let mut ring = TelemetryRing::default();
        ring.push(entry(1));
        ring.clear();
        assert!(ring.is_empty());
    }

    #[test]
    fn test_message_ids_are_ordered_by_arrival() {
        let mut log = MessageLog::new();
        let first = log.append(Role::User, "one".to_string());
        let second = log.append(Role::Assistant, "two".to_string());

        assert!(first.id < second.id);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_message_ids_survive_clear() {
        let mut log = MessageLog::new();
        let first = log.append(Role::User, "one".to_string());
        log.clear();
        let second = log.append(Role::User, "again".to_string());

        assert!(log.len() == 1);
        assert_ne!(first.id, second.id);
    }
}
