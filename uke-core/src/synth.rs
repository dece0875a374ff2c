//! Tone synthesis for the metronome click.
//!
//! Pure functions: the same inputs always produce the same buffer, so the
//! click can be rendered once per sample rate and shared.

use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ClickConfig;

/// Generates a sine tone.
///
/// # Arguments
/// * `frequency` - Tone frequency in Hz
/// * `duration` - Length of the buffer
/// * `sample_rate` - Sample rate in Hz
/// * `gain` - Peak amplitude (1.0 = full scale)
///
/// # Returns
/// `floor(sample_rate * duration)` samples in `[-gain, gain]`.
pub fn generate_tone(frequency: f32, duration: Duration, sample_rate: u32, gain: f32) -> Vec<f32> {
    let num_samples = (sample_rate as f64 * duration.as_secs_f64()) as usize;
    if sample_rate == 0 {
        return Vec::new();
    }
    let step = TAU * frequency as f64 / sample_rate as f64;
    (0..num_samples)
        .map(|i| gain * (step * i as f64).sin() as f32)
        .collect()
}

/// A click buffer rendered once for a given output rate.
#[derive(Debug, Clone)]
pub struct ClickSound {
    sample_rate: u32,
    buffer: Arc<[f32]>,
}

impl ClickSound {
    pub fn new(config: &ClickConfig, sample_rate: u32) -> Self {
        let samples = generate_tone(config.frequency, config.duration(), sample_rate, config.gain);
        Self {
            sample_rate,
            buffer: samples.into(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Shared handle to the rendered samples.
    pub fn buffer(&self) -> Arc<[f32]> {
        Arc::clone(&self.buffer)
    }
}
