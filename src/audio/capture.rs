//! # Microphone Capture
//!
//! Wraps the platform microphone behind the `CaptureDevice` trait. While
//! armed, the device emits fixed-duration PCM frames onto the session event
//! channel; disarming is synchronous: once `disarm()` returns, the device
//! emits nothing further. Stale frames still in flight are additionally
//! fenced by the capture epoch carried on every event.
//!
//! The cpal stream is owned by a dedicated thread because cpal streams are
//! not `Send`; the session task only holds the control handle.

use std::sync::mpsc as std_mpsc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use tokio::sync::mpsc;

use crate::audio::frame::{float_to_pcm, FrameSpec};
use crate::error::{VoiceError, VoiceResult};
use crate::session::SessionEvent;

/// A source of fixed-duration PCM frames.
///
/// Exactly one capture device may be armed per session at a time; the
/// session state machine is the only caller.
pub trait CaptureDevice: Send {
    /// Start emitting frames tagged with `epoch` onto the event channel.
    /// Arming an already-armed device is a no-op.
    fn arm(
        &mut self,
        epoch: u64,
        spec: FrameSpec,
        events: mpsc::Sender<SessionEvent>,
    ) -> VoiceResult<()>;

    /// Stop emitting frames. Must not return until no further frame will be
    /// produced by this device.
    fn disarm(&mut self);
}

/// Captures audio from the default input device via cpal.
pub struct CpalCaptureDevice {
    worker: Option<CaptureWorker>,
}

struct CaptureWorker {
    stop: std_mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl CpalCaptureDevice {
    pub fn new() -> Self {
        Self { worker: None }
    }
}

impl Default for CpalCaptureDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDevice for CpalCaptureDevice {
    fn arm(
        &mut self,
        epoch: u64,
        spec: FrameSpec,
        events: mpsc::Sender<SessionEvent>,
    ) -> VoiceResult<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<()>>();

        // The stream must be built and dropped on the thread that owns it.
        let handle = thread::spawn(move || {
            let stream = match build_input_stream(epoch, spec, events) {
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
                tracing::error!(error = %err, "microphone stream failed to start");
                return;
            }

            // Park until disarm; dropping the stream stops the callbacks.
            let _ = stop_rx.recv();
            drop(stream);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(CaptureWorker {
                    stop: stop_tx,
                    handle,
                });
                tracing::debug!(
                    sample_rate = spec.sample_rate,
                    channels = spec.channels,
                    frame_samples = spec.frame_samples,
                    "microphone armed"
                );
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => Err(VoiceError::Transport(
                "capture thread exited before reporting readiness".to_string(),
            )),
        }
    }

    fn disarm(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop.send(());
            let _ = worker.handle.join();
            tracing::debug!("microphone disarmed");
        }
    }
}

impl Drop for CpalCaptureDevice {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Open the default input device and assemble callback data into
/// fixed-duration frames, each delivered as one session event.
fn build_input_stream(
    epoch: u64,
    spec: FrameSpec,
    events: mpsc::Sender<SessionEvent>,
) -> VoiceResult<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| VoiceError::Transport("no input device available".to_string()))?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| VoiceError::Transport(e.to_string()))?
        .find(|c| {
            c.channels() == spec.channels as u16
                && c.min_sample_rate() <= SampleRate(spec.sample_rate)
                && c.max_sample_rate() >= SampleRate(spec.sample_rate)
        })
        .ok_or_else(|| {
            VoiceError::Transport(format!(
                "no input config for {}Hz/{}ch",
                spec.sample_rate, spec.channels
            ))
        })?;

    let config = supported
        .with_sample_rate(SampleRate(spec.sample_rate))
        .config();

    let frame_samples = spec.frame_samples;
    let mut pending: Vec<i16> = Vec::with_capacity(frame_samples * 2);

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                pending.extend(float_to_pcm(data));
                while pending.len() >= frame_samples {
                    let samples: Vec<i16> = pending.drain(..frame_samples).collect();
                    // try_send keeps the audio callback non-blocking; a full
                    // session queue costs one frame, never a stall.
                    if events
                        .try_send(SessionEvent::Capture { epoch, samples })
                        .is_err()
                    {
                        tracing::warn!("session event queue full, dropping captured frame");
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "microphone capture error");
            },
            None,
        )
        .map_err(|e| VoiceError::Transport(e.to_string()))?;

    Ok(stream)
}

/// Test double: emits a fixed script of frames when armed.
#[cfg(test)]
pub mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Default)]
    pub struct ScriptedState {
        pub armed: bool,
        pub disarm_count: usize,
    }

    pub struct ScriptedCapture {
        frames: Vec<Vec<i16>>,
        state: Arc<Mutex<ScriptedState>>,
    }

    impl ScriptedCapture {
        pub fn new(frames: Vec<Vec<i16>>) -> Self {
            Self {
                frames,
                state: Arc::new(Mutex::new(ScriptedState::default())),
            }
        }

        /// Shared view of the device state, usable after the device has been
        /// boxed into a session.
        pub fn state(&self) -> Arc<Mutex<ScriptedState>> {
            Arc::clone(&self.state)
        }
    }

    impl CaptureDevice for ScriptedCapture {
        fn arm(
            &mut self,
            epoch: u64,
            _spec: FrameSpec,
            events: mpsc::Sender<SessionEvent>,
        ) -> VoiceResult<()> {
            self.state.lock().unwrap().armed = true;
            for samples in &self.frames {
                let _ = events.try_send(SessionEvent::Capture {
                    epoch,
                    samples: samples.clone(),
                });
            }
            Ok(())
        }

        fn disarm(&mut self) {
            let mut state = self.state.lock().unwrap();
            state.armed = false;
            state.disarm_count += 1;
        }
    }
}
