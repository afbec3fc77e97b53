//! # Transcript Reconstruction
//!
//! Rebuilds complete conversation turns from possibly-fragmented transcript
//! events. Partial updates accumulate in-flight text keyed by the wire
//! message id; only a final event seals a turn into a `VoiceMessage`.
//! Partials are an optimization, not a requirement; a final for an unseen
//! id seals from its own text.

use std::collections::HashMap;

use crate::protocol::messages::Role;

/// Accumulates partial transcript text until a final event seals the turn.
///
/// In-flight state lives only here; the conversation log never sees a
/// partial, so a turn can never appear twice.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    in_flight: HashMap<String, String>,
}

/// A sealed turn, ready for the conversation log. The log assigns the
/// public message id and timestamp on append.
#[derive(Debug, Clone, PartialEq)]
pub struct SealedTurn {
    pub role: Role,
    pub text: String,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a partial update: longer text replaces the earlier fragment.
    pub fn apply_partial(&mut self, message_id: &str, text: String) {
        self.in_flight.insert(message_id.to_string(), text);
    }

    /// Seal a turn. The final event's own text wins over any accumulated
    /// partial text, and the in-flight buffer for the id is discarded.
    pub fn seal(&mut self, message_id: &str, role: Role, text: String) -> SealedTurn {
        self.in_flight.remove(message_id);
        SealedTurn { role, text }
    }

    /// Current in-flight text for an id, if any.
    pub fn partial_text(&self, message_id: &str) -> Option<&str> {
        self.in_flight.get(message_id).map(String::as_str)
    }

    /// Number of turns currently being reconstructed.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Partials update in place; the final seals exactly one turn using its
    /// own text, and the in-flight buffer is discarded.
    #[test]
    fn test_partials_then_final_seal_one_turn() {
        let mut assembler = TranscriptAssembler::new();

        assembler.apply_partial("1", "he".to_string());
        assembler.apply_partial("1", "hello".to_string());
        assert_eq!(assembler.partial_text("1"), Some("hello"));

        let sealed = assembler.seal("1", Role::Assistant, "hello world".to_string());
        assert_eq!(sealed.role, Role::Assistant);
        assert_eq!(sealed.text, "hello world");
        assert_eq!(assembler.in_flight_count(), 0);
    }

    #[test]
    fn test_final_without_partials_seals_from_own_text() {
        let mut assembler = TranscriptAssembler::new();
        let sealed = assembler.seal("9", Role::User, "just this".to_string());
        assert_eq!(sealed.text, "just this");
    }

    #[test]
    fn test_interleaved_ids_reconstruct_independently() {
        let mut assembler = TranscriptAssembler::new();
        assembler.apply_partial("a", "first".to_string());
        assembler.apply_partial("b", "second".to_string());

        let sealed_b = assembler.seal("b", Role::Assistant, "second done".to_string());
        assert_eq!(sealed_b.text, "second done");
        assert_eq!(assembler.partial_text("a"), Some("first"));
    }
}
