//! # Speaker Playback
//!
//! Wraps the platform speaker behind the `PlaybackSink` trait. Frames are
//! queued in sequence order by the session (the jitter buffer upstream
//! guarantees ordering) and played back-to-back; `stop()` discards anything
//! still queued so a disconnect never leaves audio draining.
//!
//! Like capture, the cpal stream lives on its own thread; the sink handle
//! only touches the shared sample queue.

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;

use crate::error::{VoiceError, VoiceResult};

/// Bound on queued samples (10 seconds of audio); beyond it the oldest
/// samples are discarded so a stalled device cannot grow memory forever.
const MAX_QUEUED_SECONDS: usize = 10;

/// An ordered audio output. The session hands frames over in playback
/// order; the sink owns pacing.
pub trait PlaybackSink: Send {
    /// Queue one frame for playback.
    fn play(&mut self, samples: Vec<i16>);

    /// Discard queued audio and release the output device. Safe to call at
    /// any time, including when nothing is playing.
    fn stop(&mut self);
}

/// Plays queued PCM through the default output device via cpal.
pub struct CpalPlaybackSink {
    sample_rate: u32,
    channels: u8,
    queue: Arc<Mutex<VecDeque<i16>>>,
    worker: Option<PlaybackWorker>,
    start_failed: bool,
}

struct PlaybackWorker {
    stop: std_mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl CpalPlaybackSink {
    pub fn new(sample_rate: u32, channels: u8) -> Self {
        Self {
            sample_rate,
            channels,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            worker: None,
            start_failed: false,
        }
    }

    /// Lazily start the output stream thread on first playback.
    fn ensure_worker(&mut self) -> VoiceResult<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<()>>();
        let queue = Arc::clone(&self.queue);
        let sample_rate = self.sample_rate;
        let channels = self.channels;

        let handle = thread::spawn(move || {
            let stream = match build_output_stream(sample_rate, channels, queue) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };

            if let Err(err) = stream.play() {
                tracing::error!(error = %err, "speaker stream failed to start");
                return;
            }

            let _ = stop_rx.recv();
            drop(stream);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(PlaybackWorker {
                    stop: stop_tx,
                    handle,
                });
                tracing::debug!(sample_rate, channels, "speaker playback started");
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => Err(VoiceError::Transport(
                "playback thread exited before reporting readiness".to_string(),
            )),
        }
    }
}

impl PlaybackSink for CpalPlaybackSink {
    fn play(&mut self, samples: Vec<i16>) {
        if self.start_failed {
            return;
        }

        if let Err(err) = self.ensure_worker() {
            // Latch the failure: retrying per-frame would hammer the device
            tracing::warn!(error = %err, "speaker unavailable, discarding inbound audio");
            self.start_failed = true;
            return;
        }

        let max_queued = self.sample_rate as usize * self.channels as usize * MAX_QUEUED_SECONDS;
        let mut queue = self.queue.lock().unwrap();
        queue.extend(samples);
        while queue.len() > max_queued {
            queue.pop_front();
        }
    }

    fn stop(&mut self) {
        self.queue.lock().unwrap().clear();
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop.send(());
            let _ = worker.handle.join();
            tracing::debug!("speaker playback stopped");
        }
        self.start_failed = false;
    }
}

impl Drop for CpalPlaybackSink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the default output device; the callback drains the shared queue and
/// zero-fills any shortfall so underruns produce silence, not artifacts.
fn build_output_stream(
    sample_rate: u32,
    channels: u8,
    queue: Arc<Mutex<VecDeque<i16>>>,
) -> VoiceResult<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| VoiceError::Transport("no output device available".to_string()))?;

    let supported = device
        .supported_output_configs()
        .map_err(|e| VoiceError::Transport(e.to_string()))?
        .find(|c| {
            c.channels() == channels as u16
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .ok_or_else(|| {
            VoiceError::Transport(format!(
                "no output config for {}Hz/{}ch",
                sample_rate, channels
            ))
        })?;

    let config = supported.with_sample_rate(SampleRate(sample_rate)).config();

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut queue = queue.lock().unwrap();
                for slot in data.iter_mut() {
                    *slot = match queue.pop_front() {
                        Some(sample) => sample as f32 / 32768.0,
                        None => 0.0,
                    };
                }
            },
            |err| {
                tracing::error!(error = %err, "speaker playback error");
            },
            None,
        )
        .map_err(|e| VoiceError::Transport(e.to_string()))?;

    Ok(stream)
}

/// Test double: records played frames and stop calls.
#[cfg(test)]
pub mod testing {
    use super::*;

    #[derive(Debug, Default)]
    pub struct SinkState {
        pub frames: Vec<Vec<i16>>,
        pub stop_count: usize,
    }

    pub struct RecordingSink {
        state: Arc<Mutex<SinkState>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(SinkState::default())),
            }
        }

        pub fn state(&self) -> Arc<Mutex<SinkState>> {
            Arc::clone(&self.state)
        }
    }

    impl PlaybackSink for RecordingSink {
        fn play(&mut self, samples: Vec<i16>) {
            self.state.lock().unwrap().frames.push(samples);
        }

        fn stop(&mut self) {
            self.state.lock().unwrap().stop_count += 1;
        }
    }
}
