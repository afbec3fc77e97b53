//! # Inbound Audio Jitter Buffer
//!
//! Reorders inbound audio chunks by sequence number within a bounded window
//! so playback always receives frames in order. Frames that arrive after
//! playback has moved past them are dropped; a gap that the window cannot
//! absorb is skipped so playback never stalls indefinitely. Both outcomes
//! are reported to the caller for logging; neither is fatal.

use std::collections::BTreeMap;

/// Result of offering one frame to the buffer.
#[derive(Debug, Default, PartialEq)]
pub struct JitterOutput {
    /// Frames now playable, in strict sequence order.
    pub ready: Vec<(u32, Vec<i16>)>,

    /// Sequence dropped because it arrived later than the window allows
    /// (or was a duplicate of a frame already queued).
    pub late: Option<u32>,

    /// Sequences abandoned to keep the reorder window bounded.
    pub skipped: Vec<u32>,
}

/// Bounded reorder window keyed by sequence number.
///
/// The window bounds how many out-of-order frames may be held at once;
/// when a missing frame keeps more than `window` successors queued, the
/// gap is declared lost and playback resumes from the oldest queued frame.
#[derive(Debug)]
pub struct JitterBuffer {
    window: u32,
    next: Option<u32>,
    pending: BTreeMap<u32, Vec<i16>>,
}

impl JitterBuffer {
    pub fn new(window: u32) -> Self {
        Self {
            window: window.max(1),
            next: None,
            pending: BTreeMap::new(),
        }
    }

    /// Offer one frame; returns everything that became playable plus any
    /// drop/skip decisions made to keep the window bounded.
    pub fn push(&mut self, sequence: u32, samples: Vec<i16>) -> JitterOutput {
        let mut output = JitterOutput::default();

        // The first frame observed defines the playback base.
        let next = *self.next.get_or_insert(sequence);

        if sequence < next || self.pending.contains_key(&sequence) {
            output.late = Some(sequence);
            return output;
        }

        self.pending.insert(sequence, samples);
        self.drain_ready(&mut output);

        // A persistent gap must not hold back more than `window` frames.
        while self.pending.len() > self.window as usize {
            let oldest = *self
                .pending
                .keys()
                .next()
                .unwrap_or(&next);
            let mut expected = self.next.unwrap_or(oldest);
            while expected < oldest {
                output.skipped.push(expected);
                expected += 1;
            }
            self.next = Some(oldest);
            self.drain_ready(&mut output);
        }

        output
    }

    /// Forget all pending frames and the sequence base (used on disconnect).
    pub fn reset(&mut self) {
        self.pending.clear();
        self.next = None;
    }

    fn drain_ready(&mut self, output: &mut JitterOutput) {
        while let Some(next) = self.next {
            match self.pending.remove(&next) {
                Some(samples) => {
                    output.ready.push((next, samples));
                    self.next = Some(next + 1);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: i16) -> Vec<i16> {
        vec![n; 4]
    }

    /// Out-of-order arrival [1, 3, 2] plays back as [1, 2, 3].
    #[test]
    fn test_reorders_within_window() {
        let mut jitter = JitterBuffer::new(8);

        let out1 = jitter.push(1, frame(1));
        assert_eq!(out1.ready.len(), 1);
        assert_eq!(out1.ready[0].0, 1);

        let out3 = jitter.push(3, frame(3));
        assert!(out3.ready.is_empty());

        let out2 = jitter.push(2, frame(2));
        let played: Vec<u32> = out2.ready.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(played, vec![2, 3]);
    }

    #[test]
    fn test_late_frame_is_dropped_not_played() {
        let mut jitter = JitterBuffer::new(8);
        jitter.push(5, frame(5));
        jitter.push(6, frame(6));

        let out = jitter.push(4, frame(4));
        assert!(out.ready.is_empty());
        assert_eq!(out.late, Some(4));
    }

    #[test]
    fn test_duplicate_frame_is_dropped() {
        let mut jitter = JitterBuffer::new(8);
        jitter.push(1, frame(1));
        jitter.push(3, frame(3));

        let out = jitter.push(3, frame(3));
        assert_eq!(out.late, Some(3));
    }

    /// A gap the window cannot absorb is skipped so playback continues.
    #[test]
    fn test_unfillable_gap_is_skipped() {
        let mut jitter = JitterBuffer::new(2);
        jitter.push(1, frame(1)); // played, next = 2

        // Sequence 2 never arrives; 3..=5 pile up past the window.
        assert!(jitter.push(3, frame(3)).ready.is_empty());
        assert!(jitter.push(4, frame(4)).ready.is_empty());

        let out = jitter.push(5, frame(5));
        assert_eq!(out.skipped, vec![2]);
        let played: Vec<u32> = out.ready.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(played, vec![3, 4, 5]);
    }

    #[test]
    fn test_reset_forgets_sequence_base() {
        let mut jitter = JitterBuffer::new(8);
        jitter.push(100, frame(1));
        jitter.reset();

        // A fresh connection may restart numbering from 1.
        let out = jitter.push(1, frame(1));
        assert_eq!(out.ready.len(), 1);
    }
}
