//! # PCM Frame Utilities
//!
//! Shared helpers for fixed-duration PCM frames: sizing math from the audio
//! settings, structural validation before frames reach the wire, and the
//! f32-to-i16 conversion used at the capture boundary (capture callbacks
//! hand over f32 samples; the wire carries 16-bit PCM).

use crate::config::AudioSettings;
use crate::error::{VoiceError, VoiceResult};

/// Concrete frame geometry derived from the audio settings, captured once
/// when the capture device is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpec {
    pub sample_rate: u32,
    pub channels: u8,
    pub bit_depth: u8,

    /// Samples per frame across all channels.
    pub frame_samples: usize,
}

impl FrameSpec {
    /// Derive the frame geometry from configured audio settings.
    ///
    /// ## Example:
    /// 20ms at 24kHz mono: 24000 * 20 / 1000 = 480 samples per frame.
    pub fn from_settings(audio: &AudioSettings) -> Self {
        let per_channel = (audio.sample_rate as usize * audio.frame_duration_ms as usize) / 1000;
        Self {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            bit_depth: audio.bit_depth,
            frame_samples: per_channel * audio.channels as usize,
        }
    }
}

/// Structural check applied to every captured frame before it is framed for
/// the wire. The final frame before disarm may be shorter than the nominal
/// frame size; emptiness is the only hard failure.
pub fn validate_frame(samples: &[i16]) -> VoiceResult<()> {
    if samples.is_empty() {
        return Err(VoiceError::Protocol("empty audio frame".to_string()));
    }
    Ok(())
}

/// Convert f32 samples [-1.0, 1.0] to 16-bit PCM.
pub fn float_to_pcm(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let scaled = sample * 32768.0;
            scaled.clamp(-32768.0, 32767.0) as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizing() {
        let audio = AudioSettings {
            sample_rate: 24000,
            channels: 1,
            bit_depth: 16,
            frame_duration_ms: 20,
        };
        let spec = FrameSpec::from_settings(&audio);
        assert_eq!(spec.frame_samples, 480);

        let stereo = AudioSettings { channels: 2, ..audio };
        assert_eq!(FrameSpec::from_settings(&stereo).frame_samples, 960);
    }

    #[test]
    fn test_empty_frame_rejected() {
        assert!(validate_frame(&[]).is_err());
        assert!(validate_frame(&[0, 0]).is_ok());
    }

    #[test]
    fn test_float_to_pcm_scales_and_clamps() {
        assert_eq!(float_to_pcm(&[0.0, 0.5, -0.5]), vec![0, 16384, -16384]);
        assert_eq!(float_to_pcm(&[1.0, -1.0]), vec![32767, -32768]);

        // Out-of-range input saturates instead of wrapping
        assert_eq!(float_to_pcm(&[2.0, -2.0]), vec![32767, -32768]);
    }
}
