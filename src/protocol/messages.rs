//! # Wire Protocol Messages
//!
//! Serializes and deserializes the duplex protocol spoken with the speech
//! backend. Control and transcript traffic travels as JSON text frames with
//! a tagged `type` field; audio travels as binary frames to avoid base64
//! overhead on the hot path.
//!
//! ## Message Format:
//! - **Client → Server**: JSON control messages (handshake, text, voice/language
//!   selection, pong) and binary PCM audio chunks
//! - **Server → Client**: JSON transcript events (partial/final), error
//!   reports, heartbeat pings, and binary PCM audio chunks
//!
//! ## Binary audio framing:
//! A 4-byte big-endian sequence number followed by little-endian signed
//! 16-bit PCM samples. The sequence is monotonic per direction and is what
//! the jitter buffer reorders on.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::{VoiceError, VoiceResult};

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Control messages sent from the client to the speech backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// First message after the link opens: declares the audio format and
    /// voice/language selection for this session.
    #[serde(rename = "handshake")]
    Handshake {
        session_id: String,
        voice: String,
        language: String,
        sample_rate: u32,
        channels: u8,
        bit_depth: u8,
    },

    /// A typed text message into the conversation (independent of recording)
    #[serde(rename = "text")]
    Text { text: String },

    /// Live voice selection change on an open session
    #[serde(rename = "set_voice")]
    SetVoice { voice: String },

    /// Live language selection change on an open session
    #[serde(rename = "set_language")]
    SetLanguage { language: String },

    /// Heartbeat response echoing the server's ping timestamp
    #[serde(rename = "pong")]
    Pong { timestamp: u64 },
}

/// Events received from the speech backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Incremental transcript update; replaces any earlier partial text for
    /// the same message id. Never produces a conversation log entry.
    #[serde(rename = "partial_transcript")]
    PartialTranscript { message_id: String, text: String },

    /// Seals one conversation turn. Exactly one log entry results.
    #[serde(rename = "final_transcript")]
    FinalTranscript {
        message_id: String,
        role: Role,
        text: String,
    },

    /// Server-side error report; the session continues.
    #[serde(rename = "error")]
    Error { code: String, detail: String },

    /// Heartbeat; the client answers with a pong carrying the same timestamp.
    #[serde(rename = "ping")]
    Ping { timestamp: u64 },
}

/// A decoded inbound binary audio chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundAudio {
    pub sequence: u32,
    pub samples: Vec<i16>,
}

/// Everything the session can write to the transport, pre-encoding.
///
/// Keeping encoding inside the transport's writer task means all outbound
/// traffic is serialized through one queue and frames of different kinds
/// can never interleave.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Control(ClientMessage),
    Audio { sequence: u32, samples: Vec<i16> },
}

/// Everything the transport can deliver to the session, post-decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(ServerMessage),
    Audio(InboundAudio),
}

/// Encode an outbound frame into a WebSocket message.
pub fn encode_outbound(frame: &Outbound) -> VoiceResult<WsMessage> {
    match frame {
        Outbound::Control(message) => {
            let json = serde_json::to_string(message)?;
            Ok(WsMessage::Text(json))
        }
        Outbound::Audio { sequence, samples } => {
            Ok(WsMessage::Binary(encode_audio_frame(*sequence, samples)))
        }
    }
}

/// Decode an inbound WebSocket message.
///
/// Returns `Ok(None)` for frames that carry no application payload
/// (WebSocket-level ping/pong and close are handled by the transport).
pub fn decode_incoming(message: WsMessage) -> VoiceResult<Option<Inbound>> {
    match message {
        WsMessage::Text(text) => {
            let parsed: ServerMessage = serde_json::from_str(&text)?;
            Ok(Some(Inbound::Message(parsed)))
        }
        WsMessage::Binary(data) => Ok(Some(Inbound::Audio(decode_audio_frame(&data)?))),
        _ => Ok(None),
    }
}

/// Frame a PCM chunk: 4-byte big-endian sequence, then little-endian i16 samples.
pub fn encode_audio_frame(sequence: u32, samples: &[i16]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + samples.len() * 2);
    // Writing into a Vec cannot fail
    let _ = data.write_u32::<BigEndian>(sequence);
    for &sample in samples {
        let _ = data.write_i16::<LittleEndian>(sample);
    }
    data
}

/// Parse a binary audio frame back into sequence + samples.
pub fn decode_audio_frame(data: &[u8]) -> VoiceResult<InboundAudio> {
    if data.len() < 4 {
        return Err(VoiceError::Protocol(format!(
            "audio frame too short: {} bytes",
            data.len()
        )));
    }

    let payload = &data[4..];
    if payload.is_empty() {
        return Err(VoiceError::Protocol("audio frame has no samples".to_string()));
    }
    if payload.len() % 2 != 0 {
        return Err(VoiceError::Protocol(
            "audio payload length must be even for 16-bit samples".to_string(),
        ));
    }

    let mut cursor = Cursor::new(data);
    let sequence = cursor
        .read_u32::<BigEndian>()
        .map_err(|e| VoiceError::Protocol(format!("bad sequence header: {}", e)))?;

    let mut samples = Vec::with_capacity(payload.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }

    Ok(InboundAudio { sequence, samples })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_serialization() {
        let handshake = ClientMessage::Handshake {
            session_id: "s1".to_string(),
            voice: "nova".to_string(),
            language: "en".to_string(),
            sample_rate: 24000,
            channels: 1,
            bit_depth: 16,
        };

        let json = serde_json::to_string(&handshake).unwrap();
        assert!(json.contains("\"type\":\"handshake\""));
        assert!(json.contains("24000"));

        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, handshake);
    }

    #[test]
    fn test_final_transcript_parsing() {
        let json = r#"{"type":"final_transcript","message_id":"m7","role":"assistant","text":"hello world"}"#;
        let parsed: ServerMessage = serde_json::from_str(json).unwrap();

        match parsed {
            ServerMessage::FinalTranscript {
                message_id,
                role,
                text,
            } => {
                assert_eq!(message_id, "m7");
                assert_eq!(role, Role::Assistant);
                assert_eq!(text, "hello world");
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_protocol_error() {
        let json = r#"{"type":"telemetry","data":42}"#;
        let result = decode_incoming(WsMessage::Text(json.to_string()));
        assert!(matches!(result, Err(VoiceError::Protocol(_))));
    }

    #[test]
    fn test_audio_frame_round_trip() {
        let samples = vec![0i16, 1000, -1000, i16::MAX, i16::MIN];
        let framed = encode_audio_frame(42, &samples);
        let decoded = decode_audio_frame(&framed).unwrap();

        assert_eq!(decoded.sequence, 42);
        assert_eq!(decoded.samples, samples);
    }

    #[test]
    fn test_audio_frame_rejects_short_and_odd_payloads() {
        assert!(decode_audio_frame(&[0, 0]).is_err());
        assert!(decode_audio_frame(&[0, 0, 0, 1]).is_err()); // header only
        assert!(decode_audio_frame(&[0, 0, 0, 1, 0xAB]).is_err()); // odd payload
    }

    #[test]
    fn test_ping_decodes_to_message() {
        let json = r#"{"type":"ping","timestamp":1234}"#;
        let decoded = decode_incoming(WsMessage::Text(json.to_string())).unwrap();
        assert_eq!(
            decoded,
            Some(Inbound::Message(ServerMessage::Ping { timestamp: 1234 }))
        );
    }

    #[test]
    fn test_ws_control_frames_carry_no_payload() {
        let decoded = decode_incoming(WsMessage::Ping(vec![1, 2, 3])).unwrap();
        assert!(decoded.is_none());
    }
}
