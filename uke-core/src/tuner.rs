//! # Tuner Module
//!
//! Drives the tuner path: capture → pitch detection → note mapping.
//!
//! ## Lifecycle
//! `Idle → Starting → Running → Stopping → Idle`, with `Error` reachable
//! from `Starting` (device refused) and `Running` (device lost). While
//! running, a `PeriodicTask` polls the newest captured frame on a fixed
//! interval; frames that arrive between polls are simply skipped.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioCaptureSession, CaptureDevice};
use crate::config::TunerConfig;
use crate::error::{DeviceError, Result};
use crate::pitch::PitchDetector;
use crate::task::PeriodicTask;
use crate::tuning::{NoteMapper, TuningResult, TuningStatus};

pub const STATUS_READY: &str = "Click start to begin.";
pub const STATUS_REQUESTING: &str = "Requesting microphone access...";
pub const STATUS_ACTIVE: &str = "Tuner active. Pluck a string!";
pub const STATUS_STOPPED: &str = "Tuner stopped.";
pub const STATUS_ERROR: &str = "Error: Microphone access needed.";

/// Lifecycle state of the tuner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunerState {
    Idle,
    Starting,
    Running,
    Stopping,
    Error,
}

/// Everything a UI needs to draw the tuner.
#[derive(Debug, Clone, PartialEq)]
pub struct TunerSnapshot {
    pub state: TunerState,
    pub note: Option<String>,
    pub cents_deviation: f64,
    pub status: TuningStatus,
    pub frequency: Option<f32>,
    pub status_text: String,
    pub error: Option<String>,
}

struct TunerCore<D: CaptureDevice> {
    session: AudioCaptureSession<D>,
    detector: PitchDetector,
    mapper: NoteMapper,
    in_tune_cents: f64,
    state: TunerState,
    result: TuningResult,
    status_text: String,
    error: Option<String>,
}

impl<D: CaptureDevice> TunerCore<D> {
    fn snapshot(&self) -> TunerSnapshot {
        TunerSnapshot {
            state: self.state,
            note: self.result.note.clone(),
            cents_deviation: self.result.cents_deviation,
            status: self.result.status,
            frequency: self.result.frequency,
            status_text: self.status_text.clone(),
            error: self.error.clone(),
        }
    }

    fn fail(&mut self, err: &DeviceError) {
        if err.is_permission() {
            warn!("microphone access refused");
        } else {
            error!(error = %err, from = ?self.state, "tuner device failure");
        }
        self.session.stop();
        self.state = TunerState::Error;
        self.result = TuningResult::no_signal();
        self.error = Some(err.user_message());
        self.status_text = STATUS_ERROR.to_string();
    }

    fn poll(&mut self) -> Result<Option<TuningResult>> {
        if self.state != TunerState::Running {
            return Ok(None);
        }

        let frame = match self.session.latest_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };

        let estimate = self.detector.detect(&frame);
        let matched = self.mapper.map(estimate);
        let result = TuningResult::from_match(estimate, matched, self.in_tune_cents);
        debug!(
            frequency = ?result.frequency,
            note = ?result.note,
            cents = result.cents_deviation,
            "tuner frame analysed"
        );

        self.status_text = result.status.message().to_string();
        self.result = result.clone();
        Ok(Some(result))
    }
}

/// Instrument tuner bound to one capture device.
pub struct TunerStateMachine<D: CaptureDevice + 'static> {
    core: Arc<Mutex<TunerCore<D>>>,
    task: Option<PeriodicTask>,
    poll_interval: Duration,
}

impl<D: CaptureDevice + 'static> TunerStateMachine<D> {
    pub fn new(device: D, config: &TunerConfig) -> Self {
        let core = TunerCore {
            session: AudioCaptureSession::new(device, config.frame_size),
            detector: PitchDetector::from_config(config),
            mapper: NoteMapper::from_config(config),
            in_tune_cents: config.in_tune_cents as f64,
            state: TunerState::Idle,
            result: TuningResult::no_signal(),
            status_text: STATUS_READY.to_string(),
            error: None,
        };
        Self {
            core: Arc::new(Mutex::new(core)),
            task: None,
            poll_interval: config.poll_interval(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TunerCore<D>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> TunerState {
        self.lock().state
    }

    pub fn snapshot(&self) -> TunerSnapshot {
        self.lock().snapshot()
    }

    /// Opens the capture device and begins polling.
    ///
    /// On failure the tuner is left in `Error` with a user message; calling
    /// `start()` again retries.
    pub fn start(&mut self) -> Result<()> {
        {
            let mut core = self.lock();
            if core.state == TunerState::Running {
                return Ok(());
            }
            core.state = TunerState::Starting;
            core.error = None;
            core.status_text = STATUS_REQUESTING.to_string();

            if let Err(e) = core.session.start() {
                core.fail(&e);
                return Err(e);
            }
            core.state = TunerState::Running;
            core.result = TuningResult::no_signal();
            core.status_text = STATUS_ACTIVE.to_string();
            info!("tuner running");
        }

        if let Some(mut stale) = self.task.take() {
            stale.cancel();
        }

        let core = Arc::clone(&self.core);
        let task = PeriodicTask::spawn("uke-tuner", self.poll_interval, move || {
            let mut core = core.lock().unwrap_or_else(PoisonError::into_inner);
            match core.poll() {
                Ok(_) if core.state == TunerState::Running => ControlFlow::Continue(()),
                _ => ControlFlow::Break(()),
            }
        });

        match task {
            Ok(task) => {
                self.task = Some(task);
                Ok(())
            }
            Err(e) => {
                let err = DeviceError::StreamFailed(format!("failed to spawn tuner thread: {e}"));
                self.lock().fail(&err);
                Err(err)
            }
        }
    }

    /// Analyses the newest frame on the caller's thread.
    ///
    /// Returns `Ok(None)` when not running or when no new frame arrived.
    pub fn poll(&mut self) -> Result<Option<TuningResult>> {
        self.lock().poll()
    }

    /// Cancels polling, releases the microphone and returns to `Idle`.
    /// Always allowed; repeated calls are harmless.
    pub fn stop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.cancel();
        }
        let mut core = self.lock();
        if core.state != TunerState::Idle {
            info!(from = ?core.state, "tuner stopping");
        }
        core.state = TunerState::Stopping;
        core.session.stop();
        core.result = TuningResult::no_signal();
        core.error = None;
        core.status_text = STATUS_STOPPED.to_string();
        core.state = TunerState::Idle;
    }
}

impl<D: CaptureDevice + 'static> Drop for TunerStateMachine<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioFrame, CaptureStream, FrameSlot};
    use crossbeam_channel::Sender;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedDevice {
        slot: FrameSlot,
        deny: bool,
        opens: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    impl CaptureDevice for ScriptedDevice {
        fn open(&mut self, _frame_size: usize) -> Result<CaptureStream> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.deny {
                return Err(DeviceError::PermissionDenied);
            }
            Ok(CaptureStream { sample_rate: 44_100, frames: self.slot.receiver() })
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> TunerConfig {
        TunerConfig {
            // Keep the background poller out of the way of manual polls.
            poll_interval_ms: 60_000,
            ..TunerConfig::default()
        }
    }

    fn device(deny: bool) -> (ScriptedDevice, FrameSlot, Arc<AtomicUsize>) {
        let slot = FrameSlot::new();
        let closes = Arc::new(AtomicUsize::new(0));
        let device = ScriptedDevice {
            slot: slot.clone(),
            deny,
            opens: Arc::new(AtomicUsize::new(0)),
            closes: Arc::clone(&closes),
        };
        (device, slot, closes)
    }

    fn sine(freq: f32) -> AudioFrame {
        let samples = (0..2048)
            .map(|i| 0.4 * (std::f32::consts::TAU * freq * i as f32 / 44_100.0).sin())
            .collect();
        AudioFrame::new(samples, 44_100)
    }

    #[test]
    fn initial_snapshot_prompts_to_start() {
        let (device, _, _) = device(false);
        let tuner = TunerStateMachine::new(device, &config());
        let snap = tuner.snapshot();
        assert_eq!(snap.state, TunerState::Idle);
        assert_eq!(snap.status_text, STATUS_READY);
        assert_eq!(snap.status, TuningStatus::NoSignal);
    }

    #[test]
    fn denied_microphone_moves_to_error() {
        let (device, _, closes) = device(true);
        let mut tuner = TunerStateMachine::new(device, &config());
        assert_eq!(tuner.start(), Err(DeviceError::PermissionDenied));
        let snap = tuner.snapshot();
        assert_eq!(snap.state, TunerState::Error);
        assert_eq!(snap.status_text, STATUS_ERROR);
        assert!(snap.error.is_some());

        tuner.stop();
        assert_eq!(tuner.state(), TunerState::Idle);
        assert_eq!(tuner.snapshot().error, None);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn running_tuner_reports_matched_note() {
        let (device, slot, _) = device(false);
        let mut tuner = TunerStateMachine::new(device, &config());
        tuner.start().unwrap();
        assert_eq!(tuner.snapshot().status_text, STATUS_ACTIVE);

        slot.publish(sine(392.0));
        let result = tuner.poll().unwrap().unwrap();
        assert_eq!(result.note.as_deref(), Some("G"));
        assert!(result.cents_deviation.abs() < 5.0);
        assert_eq!(result.status, TuningStatus::InTune);
        assert_eq!(tuner.snapshot().status_text, "In Tune!");
        tuner.stop();
    }

    #[test]
    fn silence_prompts_for_a_pluck() {
        let (device, slot, _) = device(false);
        let mut tuner = TunerStateMachine::new(device, &config());
        tuner.start().unwrap();
        slot.publish(AudioFrame::new(vec![0.0; 2048], 44_100));
        let result = tuner.poll().unwrap().unwrap();
        assert_eq!(result.note, None);
        assert_eq!(tuner.snapshot().status_text, "Pluck a string!");
        assert_eq!(tuner.poll().unwrap(), None);
        tuner.stop();
    }

    /// Hands out a fresh channel on every open; `unplug` drops its sender.
    struct UnpluggableDevice {
        sender: Arc<Mutex<Option<Sender<AudioFrame>>>>,
        closes: Arc<AtomicUsize>,
    }

    impl CaptureDevice for UnpluggableDevice {
        fn open(&mut self, _frame_size: usize) -> Result<CaptureStream> {
            let (tx, rx) = crossbeam_channel::bounded(1);
            *self.sender.lock().unwrap() = Some(tx);
            Ok(CaptureStream { sample_rate: 44_100, frames: rx })
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn unpluggable() -> (UnpluggableDevice, Arc<Mutex<Option<Sender<AudioFrame>>>>, Arc<AtomicUsize>) {
        let sender = Arc::new(Mutex::new(None));
        let closes = Arc::new(AtomicUsize::new(0));
        let device = UnpluggableDevice {
            sender: Arc::clone(&sender),
            closes: Arc::clone(&closes),
        };
        (device, sender, closes)
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !done() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn lost_input_while_running_moves_to_error() {
        let (device, sender, closes) = unpluggable();
        let mut tuner = TunerStateMachine::new(device, &config());
        tuner.start().unwrap();
        assert_eq!(tuner.state(), TunerState::Running);

        sender.lock().unwrap().take();
        assert_eq!(tuner.poll(), Err(DeviceError::Disconnected));

        let snap = tuner.snapshot();
        assert_eq!(snap.state, TunerState::Error);
        assert_eq!(snap.status_text, STATUS_ERROR);
        assert!(snap.error.is_some());
        assert_eq!(snap.note, None);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(tuner.poll().unwrap(), None);

        tuner.start().unwrap();
        let snap = tuner.snapshot();
        assert_eq!(snap.state, TunerState::Running);
        assert_eq!(snap.status_text, STATUS_ACTIVE);
        assert_eq!(snap.error, None);

        let live = sender.lock().unwrap().clone().unwrap();
        live.send(sine(392.0)).unwrap();
        assert_eq!(tuner.poll().unwrap().unwrap().note.as_deref(), Some("G"));

        tuner.stop();
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn background_polling_notices_lost_input() {
        let (device, sender, closes) = unpluggable();
        let fast = TunerConfig {
            poll_interval_ms: 2,
            ..TunerConfig::default()
        };
        let mut tuner = TunerStateMachine::new(device, &fast);
        tuner.start().unwrap();

        sender.lock().unwrap().take();
        wait_for(|| tuner.state() == TunerState::Error);

        let snap = tuner.snapshot();
        assert_eq!(snap.state, TunerState::Error);
        assert_eq!(snap.status_text, STATUS_ERROR);
        assert!(snap.error.is_some());
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // The poller ends itself once the input is gone.
        wait_for(|| !tuner.task.as_ref().is_some_and(PeriodicTask::is_active));
        assert!(!tuner.task.as_ref().is_some_and(PeriodicTask::is_active));

        tuner.start().unwrap();
        assert_eq!(tuner.state(), TunerState::Running);
        assert!(tuner.task.as_ref().is_some_and(PeriodicTask::is_active));
        tuner.stop();
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stop_twice_releases_device_once() {
        let (device, _, closes) = device(false);
        let mut tuner = TunerStateMachine::new(device, &config());
        tuner.start().unwrap();
        tuner.stop();
        tuner.stop();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        let snap = tuner.snapshot();
        assert_eq!(snap.state, TunerState::Idle);
        assert_eq!(snap.status_text, STATUS_STOPPED);
        assert_eq!(snap.note, None);
        assert_eq!(tuner.poll().unwrap(), None);
    }
}
