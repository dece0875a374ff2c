//! End-to-end checks of the tuner path using synthetic frames.

use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use uke_core::audio::{CaptureStream, FrameSlot};
use uke_core::error::Result;
use uke_core::{
    AudioFrame, CaptureDevice, DeviceError, NoteMapper, PitchDetector, PitchEstimate, TunerConfig,
    TunerState, TunerStateMachine, TuningStatus,
};

fn sine(freq: f32, sample_rate: u32) -> AudioFrame {
    let samples = (0..2048)
        .map(|i| 0.5 * (TAU * freq * i as f32 / sample_rate as f32).sin())
        .collect();
    AudioFrame::new(samples, sample_rate)
}

#[test]
fn g_string_is_detected_and_in_tune() {
    let config = TunerConfig::default();
    let detector = PitchDetector::from_config(&config);
    let mapper = NoteMapper::from_config(&config);

    for rate in [44_100, 48_000] {
        let estimate = detector.detect(&sine(392.0, rate));
        let freq = estimate.frequency().expect("pitch expected");
        assert!((freq - 392.0).abs() < 1.0, "{freq} Hz at {rate}");

        let matched = mapper.map(estimate).expect("match expected");
        assert_eq!(matched.label, "G");
        assert!(matched.cents.abs() < 5.0);
    }
}

#[test]
fn tone_between_strings_matches_nothing() {
    let config = TunerConfig::default();
    let detector = PitchDetector::from_config(&config);
    let mapper = NoteMapper::from_config(&config);
    let estimate = detector.detect(&sine(293.0, 44_100));
    assert!(estimate.frequency().is_some());
    assert_eq!(mapper.map(estimate), None);
}

#[test]
fn near_silence_is_no_pitch() {
    let detector = PitchDetector::default();
    let hiss: Vec<f32> = (0..2048).map(|i| if i % 2 == 0 { 0.001 } else { -0.001 }).collect();
    assert_eq!(detector.detect(&AudioFrame::new(hiss, 48_000)), PitchEstimate::Silence);
}

#[test]
fn every_open_string_matches_its_label() {
    let config = TunerConfig::default();
    let detector = PitchDetector::from_config(&config);
    let mapper = NoteMapper::from_config(&config);
    for target in &config.targets {
        let matched = mapper.map(detector.detect(&sine(target.frequency, 44_100))).unwrap();
        assert_eq!(matched.label, target.label);
    }
}

struct Mic {
    slot: FrameSlot,
    closes: Arc<AtomicUsize>,
}

impl CaptureDevice for Mic {
    fn open(&mut self, _frame_size: usize) -> Result<CaptureStream> {
        Ok(CaptureStream { sample_rate: 44_100, frames: self.slot.receiver() })
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn background_polling_follows_the_latest_frame() {
    let slot = FrameSlot::new();
    let closes = Arc::new(AtomicUsize::new(0));
    let mic = Mic { slot: slot.clone(), closes: Arc::clone(&closes) };
    let config = TunerConfig { poll_interval_ms: 2, ..TunerConfig::default() };

    let mut tuner = TunerStateMachine::new(mic, &config);
    tuner.start().unwrap();
    assert_eq!(tuner.state(), TunerState::Running);

    // Slightly sharp A: about 12 cents.
    slot.publish(sine(443.0, 44_100));
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while tuner.snapshot().note.is_none() && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
    let snap = tuner.snapshot();
    assert_eq!(snap.note.as_deref(), Some("A"));
    assert_eq!(snap.status, TuningStatus::Sharp);
    assert_eq!(snap.status_text, "Too Sharp!");

    tuner.stop();
    tuner.stop();
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(tuner.state(), TunerState::Idle);
}

struct UnpluggedMic;

impl CaptureDevice for UnpluggedMic {
    fn open(&mut self, _frame_size: usize) -> Result<CaptureStream> {
        Err(DeviceError::NoDevice)
    }

    fn close(&mut self) {}
}

#[test]
fn missing_device_surfaces_once_without_retry() {
    let mut tuner = TunerStateMachine::new(UnpluggedMic, &TunerConfig::default());
    assert_eq!(tuner.start(), Err(DeviceError::NoDevice));
    let snap = tuner.snapshot();
    assert_eq!(snap.state, TunerState::Error);
    assert!(snap.error.unwrap().contains("Microphone access denied"));
}
