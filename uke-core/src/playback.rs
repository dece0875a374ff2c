//! # Audio Playback Module
//!
//! The output side of the metronome. A `PlaybackDevice` is both the audio
//! clock and a sink that accepts buffers with an explicit start time.
//!
//! `CpalPlayback` counts rendered frames to form its clock, so a buffer
//! scheduled for time `t` starts on frame `round(t * sample_rate)` no matter
//! when the scheduling call was made.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::clock::AudioClock;
use crate::error::{DeviceError, Result};

/// Maximum number of buffers waiting to be picked up by the render thread.
const VOICE_QUEUE_CAPACITY: usize = 64;

/// An output that can start a buffer at an exact time on its own clock.
pub trait PlaybackDevice: AudioClock {
    fn sample_rate(&self) -> u32;

    /// Queues `buffer` to begin at `start_at` seconds. Playback begins at or
    /// after that time, never before.
    fn schedule_buffer(&self, buffer: Arc<[f32]>, start_at: f64) -> Result<()>;
}

/// A buffer queued for playback.
#[derive(Debug, Clone)]
pub struct Voice {
    buffer: Arc<[f32]>,
    start_frame: u64,
    position: usize,
}

impl Voice {
    pub fn new(buffer: Arc<[f32]>, start_frame: u64) -> Self {
        Self {
            buffer,
            start_frame,
            position: 0,
        }
    }

    fn finished(&self) -> bool {
        self.position >= self.buffer.len()
    }
}

/// Converts a clock time to the output frame it lands on.
pub fn start_frame_for(start_at: f64, sample_rate: u32) -> u64 {
    if start_at <= 0.0 || !start_at.is_finite() {
        return 0;
    }
    (start_at * sample_rate as f64).round() as u64
}

/// Mixes active voices into one interleaved output block.
///
/// `block_start` is the absolute frame index of `data[0]`. A voice whose start
/// frame is already in the past begins at the top of the block. Finished
/// voices are removed.
pub fn mix_voices(data: &mut [f32], channels: usize, block_start: u64, voices: &mut Vec<Voice>) {
    let channels = channels.max(1);
    let frames = data.len() / channels;

    for voice in voices.iter_mut() {
        let offset = voice.start_frame.saturating_sub(block_start);
        if offset >= frames as u64 {
            continue;
        }
        for frame in (offset as usize)..frames {
            let Some(&sample) = voice.buffer.get(voice.position) else {
                break;
            };
            voice.position += 1;
            for out in &mut data[frame * channels..(frame + 1) * channels] {
                *out += sample;
            }
        }
    }

    voices.retain(|v| !v.finished());
}

#[derive(Debug, Default)]
struct PlaybackShared {
    frames_rendered: AtomicU64,
    failed: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl PlaybackShared {
    fn fail(&self, reason: String) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
        self.failed.store(true, Ordering::SeqCst);
    }

    fn failure(&self) -> Option<String> {
        if !self.failed.load(Ordering::SeqCst) {
            return None;
        }
        let reason = self.failure.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Some(reason.unwrap_or_else(|| "output stream failed".into()))
    }
}

/// Default output device via CPAL.
///
/// Like the capture side, the `cpal::Stream` lives on its own thread; this
/// handle only holds channels and atomics.
#[derive(Debug)]
pub struct CpalPlayback {
    sample_rate: u32,
    shared: Arc<PlaybackShared>,
    voice_tx: Sender<Voice>,
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalPlayback {
    /// Opens the default output device and starts rendering silence.
    pub fn new() -> Result<Self> {
        let shared = Arc::new(PlaybackShared::default());
        let (voice_tx, voice_rx) = crossbeam_channel::bounded::<Voice>(VOICE_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<u32>>(1);

        let worker_shared = Arc::clone(&shared);
        let thread_handle = thread::Builder::new()
            .name("uke-playback".into())
            .spawn(move || {
                let (stream, sample_rate) = match start_audio_output(worker_shared, voice_rx) {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(sample_rate));
                let _ = shutdown_rx.recv();

                if let Err(e) = stream.pause() {
                    warn!(error = %e, "error pausing output stream");
                }
                drop(stream);
                debug!("playback thread finished");
            })
            .map_err(|e| DeviceError::StreamFailed(e.to_string()))?;

        let sample_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread_handle.join();
                return Err(DeviceError::StreamFailed("playback thread exited during setup".into()));
            }
        };

        Ok(Self {
            sample_rate,
            shared,
            voice_tx,
            shutdown_tx,
            thread_handle: Some(thread_handle),
        })
    }
}

impl AudioClock for CpalPlayback {
    fn now(&self) -> f64 {
        self.shared.frames_rendered.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }
}

impl PlaybackDevice for CpalPlayback {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn schedule_buffer(&self, buffer: Arc<[f32]>, start_at: f64) -> Result<()> {
        if let Some(reason) = self.shared.failure() {
            return Err(DeviceError::PlaybackFailed(reason));
        }
        let voice = Voice::new(buffer, start_frame_for(start_at, self.sample_rate));
        self.voice_tx.try_send(voice).map_err(|e| match e {
            TrySendError::Full(_) => DeviceError::PlaybackFailed("voice queue full".into()),
            TrySendError::Disconnected(_) => DeviceError::PlaybackFailed("output stream closed".into()),
        })
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.try_send(());
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("playback thread panicked");
            }
        }
    }
}

fn start_audio_output(shared: Arc<PlaybackShared>, voice_rx: Receiver<Voice>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(DeviceError::NoDevice)?;

    info!(device = %device.name().unwrap_or_else(|_| "<unknown>".into()), "using audio output device");

    let supported = device
        .default_output_config()
        .map_err(|e| DeviceError::StreamFailed(format!("Failed to get default config: {e}")))?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(DeviceError::UnsupportedConfig);
    }
    let config: cpal::StreamConfig = supported.into();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels.max(1) as usize;

    info!(sample_rate, channels, "selected output configuration");

    let render_shared = Arc::clone(&shared);
    let mut voices: Vec<Voice> = Vec::with_capacity(VOICE_QUEUE_CAPACITY);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                data.fill(0.0);
                voices.extend(voice_rx.try_iter());
                let block_start = render_shared.frames_rendered.load(Ordering::Acquire);
                mix_voices(data, channels, block_start, &mut voices);
                render_shared
                    .frames_rendered
                    .fetch_add((data.len() / channels) as u64, Ordering::Release);
            },
            move |err| {
                error!(error = %err, "an error occurred on the output stream");
                shared.fail(err.to_string());
            },
            None,
        )
        .map_err(|e| DeviceError::StreamFailed(format!("Failed to build stream: {e}")))?;

    stream
        .play()
        .map_err(|e| DeviceError::StreamFailed(format!("Failed to start stream: {e}")))?;

    Ok((stream, sample_rate))
}
