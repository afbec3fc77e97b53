//! # Protocol Codec
//!
//! Everything that touches the wire format lives here: the tagged message
//! envelope and binary audio framing (`messages`), reconstruction of
//! fragmented transcript events (`transcript`), and sequence-order recovery
//! for inbound audio (`jitter`).

pub mod jitter;
pub mod messages;
pub mod transcript;

pub use jitter::{JitterBuffer, JitterOutput};
pub use messages::{
    decode_incoming, encode_outbound, ClientMessage, Inbound, InboundAudio, Outbound, Role,
    ServerMessage,
};
pub use transcript::{SealedTurn, TranscriptAssembler};
