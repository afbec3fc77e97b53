//! # Audio Device Layer
//!
//! Platform microphone and speaker access for the streaming session.
//!
//! ## Key Components:
//! - **Capture**: fixed-duration PCM frames from the default input device while armed
//! - **Playback**: in-order frame playback through the default output device
//! - **Frame utilities**: frame sizing, validation, and sample conversion
//!
//! Both devices are trait seams so the session can be exercised end-to-end
//! without audio hardware.

pub mod capture;
pub mod frame;
pub mod playback;

pub use capture::{CaptureDevice, CpalCaptureDevice};
pub use frame::FrameSpec;
pub use playback::{CpalPlaybackSink, PlaybackSink};
