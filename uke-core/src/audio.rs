//! # Audio Capture Module
//!
//! This module owns the microphone side of the tuner. It provides:
//! - `AudioFrame`, the fixed-size unit of analysis
//! - the `CaptureDevice` seam, with a CPAL implementation
//! - `AudioCaptureSession`, which owns a device for exactly one session
//!
//! Frames are published through a single-slot channel: a fresh frame evicts
//! any frame the consumer has not read yet, so readers always see the most
//! recent audio and latency stays bounded.

use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::error::{DeviceError, Result};

/// Default number of samples per analysed frame (~46ms at 44.1kHz).
pub const BUFFER_SIZE: usize = 2048;

/// Sample rate requested from the input device when it offers a choice.
pub const PREFERRED_SAMPLE_RATE: u32 = 44_100;

/// One block of mono samples plus the rate that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Single-slot "latest wins" frame channel.
#[derive(Debug, Clone)]
pub struct FrameSlot {
    tx: Sender<AudioFrame>,
    rx: Receiver<AudioFrame>,
}

impl FrameSlot {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        Self { tx, rx }
    }

    /// Publishes a frame, replacing one that has not been read yet.
    pub fn publish(&self, frame: AudioFrame) {
        match self.tx.try_send(frame) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(frame)) => {
                let _ = self.rx.try_recv();
                let _ = self.tx.try_send(frame);
            }
        }
    }

    pub fn receiver(&self) -> Receiver<AudioFrame> {
        self.rx.clone()
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// An open input stream as seen by the session.
///
/// The receiver disconnects when the device stops producing audio for good.
#[derive(Debug)]
pub struct CaptureStream {
    pub sample_rate: u32,
    pub frames: Receiver<AudioFrame>,
}

/// Source of fixed-size audio frames.
pub trait CaptureDevice: Send {
    /// Acquires the input and starts delivering `frame_size` frames.
    fn open(&mut self, frame_size: usize) -> Result<CaptureStream>;

    /// Releases the input. Only called after a successful `open`.
    fn close(&mut self);
}

/// Lifecycle of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Active,
    Error,
}

/// Exclusive owner of a capture device for one start/stop session.
#[derive(Debug)]
pub struct AudioCaptureSession<D: CaptureDevice> {
    device: D,
    frame_size: usize,
    state: CaptureState,
    stream: Option<CaptureStream>,
}

impl<D: CaptureDevice> AudioCaptureSession<D> {
    pub fn new(device: D, frame_size: usize) -> Self {
        Self {
            device,
            frame_size,
            state: CaptureState::Idle,
            stream: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Sample rate of the active stream.
    pub fn sample_rate(&self) -> Option<u32> {
        self.stream.as_ref().map(|s| s.sample_rate)
    }

    /// Opens the device. No retry is attempted on failure.
    pub fn start(&mut self) -> Result<()> {
        if self.state == CaptureState::Active {
            return Ok(());
        }
        match self.device.open(self.frame_size) {
            Ok(stream) => {
                info!(sample_rate = stream.sample_rate, frame_size = self.frame_size, "capture started");
                self.stream = Some(stream);
                self.state = CaptureState::Active;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "capture failed to start");
                self.state = CaptureState::Error;
                Err(e)
            }
        }
    }

    /// Releases the device if held. Safe from any state, any number of times.
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            self.device.close();
            debug!("capture device released");
        }
        self.state = CaptureState::Idle;
    }

    /// Returns the newest frame since the last read, discarding older ones.
    ///
    /// `Ok(None)` means no new audio has arrived yet. A disconnected stream
    /// moves the session to `Error`.
    pub fn latest_frame(&mut self) -> Result<Option<AudioFrame>> {
        let Some(stream) = self.stream.as_ref() else {
            return Ok(None);
        };

        let mut latest = None;
        loop {
            match stream.frames.try_recv() {
                Ok(frame) => latest = Some(frame),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if latest.is_some() {
                        break;
                    }
                    error!("capture stream disconnected");
                    if self.stream.take().is_some() {
                        self.device.close();
                    }
                    self.state = CaptureState::Error;
                    return Err(DeviceError::Disconnected);
                }
            }
        }
        Ok(latest)
    }
}

impl<D: CaptureDevice> Drop for AudioCaptureSession<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Audio capture from the default input device via CPAL.
///
/// The `cpal::Stream` lives on a dedicated thread for its whole lifetime;
/// `close()` signals that thread and waits for it to drop the stream.
#[derive(Debug, Default)]
pub struct CpalCaptureDevice {
    worker: Option<CaptureWorker>,
}

#[derive(Debug)]
struct CaptureWorker {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalCaptureDevice {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureDevice for CpalCaptureDevice {
    fn open(&mut self, frame_size: usize) -> Result<CaptureStream> {
        self.close();

        let slot = FrameSlot::new();
        let frames = slot.receiver();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<u32>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let (fault_tx, fault_rx) = crossbeam_channel::bounded::<DeviceError>(1);

        let thread_handle = thread::Builder::new()
            .name("uke-capture".into())
            .spawn(move || {
                let (stream, sample_rate) = match start_audio_capture(slot, frame_size, fault_tx) {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(sample_rate));

                crossbeam_channel::select! {
                    recv(shutdown_rx) -> _ => debug!("capture thread received shutdown signal"),
                    recv(fault_rx) -> fault => {
                        if let Ok(fault) = fault {
                            error!(error = %fault, "input stream faulted");
                        }
                    }
                }

                if let Err(e) = stream.pause() {
                    warn!(error = %e, "error pausing input stream");
                }
                drop(stream);
                debug!("capture thread finished");
            })
            .map_err(|e| DeviceError::StreamFailed(e.to_string()))?;

        let mut worker = CaptureWorker {
            shutdown_tx,
            thread_handle: Some(thread_handle),
        };

        match ready_rx.recv() {
            Ok(Ok(sample_rate)) => {
                self.worker = Some(worker);
                Ok(CaptureStream { sample_rate, frames })
            }
            Ok(Err(e)) => {
                worker.join();
                Err(e)
            }
            Err(_) => {
                worker.join();
                Err(DeviceError::StreamFailed("capture thread exited during setup".into()))
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            let _ = worker.shutdown_tx.try_send(());
            worker.join();
        }
    }
}

impl Drop for CpalCaptureDevice {
    fn drop(&mut self) {
        self.close();
    }
}

impl CaptureWorker {
    fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("capture thread panicked");
            }
        }
    }
}

/// Builds and starts the input stream, returning it with its sample rate.
///
/// The callback accumulates interleaved input, keeps the first channel,
/// and publishes every complete `frame_size` block.
fn start_audio_capture(
    slot: FrameSlot,
    frame_size: usize,
    fault_tx: Sender<DeviceError>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(DeviceError::NoDevice)?;

    info!(device = %device.name().unwrap_or_else(|_| "<unknown>".into()), "using audio input device");

    let configs = device
        .supported_input_configs()
        .map_err(|e| map_device_error(&e.to_string()))?
        .collect::<Vec<_>>();
    let supported_config =
        find_supported_config(configs, PREFERRED_SAMPLE_RATE).ok_or(DeviceError::UnsupportedConfig)?;

    let rate = PREFERRED_SAMPLE_RATE
        .clamp(supported_config.min_sample_rate().0, supported_config.max_sample_rate().0);
    let config: cpal::StreamConfig = supported_config.with_sample_rate(cpal::SampleRate(rate)).into();
    let channels = config.channels.max(1) as usize;

    info!(sample_rate = rate, channels, "selected input configuration");

    let mut audio_buffer: Vec<f32> = Vec::with_capacity(frame_size * 2);
    let err_fn = move |err: cpal::StreamError| {
        error!(error = %err, "an error occurred on the input stream");
        if matches!(err, cpal::StreamError::DeviceNotAvailable) {
            let _ = fault_tx.try_send(DeviceError::Disconnected);
        }
    };

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                audio_buffer.extend(data.iter().step_by(channels));
                while audio_buffer.len() >= frame_size {
                    let frame: Vec<f32> = audio_buffer.drain(..frame_size).collect();
                    slot.publish(AudioFrame::new(frame, rate));
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => DeviceError::NoDevice,
            cpal::BuildStreamError::StreamConfigNotSupported => DeviceError::UnsupportedConfig,
            other => map_device_error(&other.to_string()),
        })?;

    stream
        .play()
        .map_err(|e| map_device_error(&e.to_string()))?;

    Ok((stream, rate))
}

/// Backends report permission problems only as text.
fn map_device_error(message: &str) -> DeviceError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        DeviceError::PermissionDenied
    } else {
        DeviceError::StreamFailed(message.to_string())
    }
}

/// Finds the best supported f32 input configuration.
///
/// Prefers fewer channels, then the range closest to `target_rate`.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            let distance = if (min..=max).contains(&target_rate) {
                0
            } else {
                min.abs_diff(target_rate).min(max.abs_diff(target_rate))
            };
            (c.channels(), distance)
        })
}
