//! # Pitch Detection Module
//!
//! Estimates the dominant frequency of a single frame using a gated,
//! band-limited autocorrelation.
//!
//! ## Features
//! - RMS noise gate to filter out silence
//! - Brute-force autocorrelation restricted to the instrument's range
//! - Parabolic interpolation for sub-sample accuracy
//!
//! The lag is chosen on the raw correlation sum. That sum shrinks as the
//! lag grows, which pulls its peak toward shorter periods (sharp readings),
//! so the sub-sample refinement runs on the normalized square difference
//! function (NSDF) instead, where that bias cancels.
//!
//! The search band is narrow (four open strings), so the
//! O(frame length x period range) cost is acceptable without an FFT.

use crate::audio::AudioFrame;
use crate::config::TunerConfig;

/// Result of analysing one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PitchEstimate {
    /// Too quiet, or no periodicity found.
    Silence,
    /// Dominant frequency in Hz.
    Frequency(f32),
}

impl PitchEstimate {
    pub fn frequency(&self) -> Option<f32> {
        match *self {
            PitchEstimate::Frequency(f) => Some(f),
            PitchEstimate::Silence => None,
        }
    }

    pub fn is_silence(&self) -> bool {
        matches!(self, PitchEstimate::Silence)
    }
}

/// Stateless autocorrelation pitch detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchDetector {
    silence_threshold: f32,
    min_frequency: f32,
    max_frequency: f32,
}

impl Default for PitchDetector {
    fn default() -> Self {
        Self::new(0.01, 200.0, 600.0)
    }
}

impl PitchDetector {
    /// # Arguments
    /// * `silence_threshold` - RMS below which a frame is treated as silence
    /// * `min_frequency` / `max_frequency` - Search band in Hz
    pub fn new(silence_threshold: f32, min_frequency: f32, max_frequency: f32) -> Self {
        Self {
            silence_threshold,
            min_frequency,
            max_frequency,
        }
    }

    pub fn from_config(config: &TunerConfig) -> Self {
        Self::new(config.silence_threshold, config.min_frequency, config.max_frequency)
    }

    /// Estimates the pitch of one captured frame.
    pub fn detect(&self, frame: &AudioFrame) -> PitchEstimate {
        detect_pitch_autocorrelation(
            frame.samples(),
            frame.sample_rate(),
            self.silence_threshold,
            self.min_frequency,
            self.max_frequency,
        )
    }
}

/// Root-mean-square amplitude of a signal; 0.0 for an empty slice.
pub fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    let sum_of_squares: f64 = signal.iter().map(|&s| s as f64 * s as f64).sum();
    (sum_of_squares / signal.len() as f64).sqrt() as f32
}

/// Unnormalized autocorrelation of `signal` at lag `period`.
fn correlation_at(signal: &[f32], period: usize) -> f64 {
    signal
        .iter()
        .zip(&signal[period..])
        .map(|(&a, &b)| a as f64 * b as f64)
        .sum()
}

/// Normalized square difference at lag `period`, in `[-1, 1]`.
///
/// `2 * r(period) / sum(x[i]^2 + x[i + period]^2)` over the overlapping
/// samples; 0.0 when the overlap carries no energy.
fn nsdf_at(signal: &[f32], period: usize) -> f64 {
    let energy: f64 = signal
        .iter()
        .zip(&signal[period..])
        .map(|(&a, &b)| a as f64 * a as f64 + b as f64 * b as f64)
        .sum();
    if energy <= 0.0 {
        return 0.0;
    }
    2.0 * correlation_at(signal, period) / energy
}

/// Gated autocorrelation pitch detection.
///
/// # Arguments
/// * `signal` - Input audio signal
/// * `sample_rate` - Sample rate in Hz
/// * `amplitude_threshold` - Minimum RMS for pitch detection
/// * `min_freq` / `max_freq` - Frequency band to search, in Hz
///
/// # Returns
/// * `PitchEstimate::Frequency(hz)` - Detected frequency
/// * `PitchEstimate::Silence` - Signal too quiet, or no usable period
pub fn detect_pitch_autocorrelation(
    signal: &[f32],
    sample_rate: u32,
    amplitude_threshold: f32,
    min_freq: f32,
    max_freq: f32,
) -> PitchEstimate {
    if sample_rate == 0 || min_freq <= 0.0 || max_freq <= min_freq {
        return PitchEstimate::Silence;
    }

    // --- Noise Gate ---
    if rms(signal) < amplitude_threshold {
        return PitchEstimate::Silence;
    }

    // --- Candidate periods for the configured band ---
    let sample_rate_f = sample_rate as f32;
    let min_period = ((sample_rate_f / max_freq).floor() as usize).max(1);
    let max_period = ((sample_rate_f / min_freq).ceil() as usize).min(signal.len().saturating_sub(1));
    if min_period > max_period {
        return PitchEstimate::Silence;
    }

    // --- Pick the lag with the strongest correlation ---
    let mut best: Option<(usize, f64)> = None;
    for period in min_period..=max_period {
        let correlation = correlation_at(signal, period);
        if best.is_none_or(|(_, c)| correlation > c) {
            best = Some((period, correlation));
        }
    }

    let Some((mut period, correlation)) = best else {
        return PitchEstimate::Silence;
    };
    if correlation <= 0.0 {
        return PitchEstimate::Silence;
    }

    // --- Settle on the NSDF peak next to the raw winner ---
    while period > min_period && nsdf_at(signal, period - 1) > nsdf_at(signal, period) {
        period -= 1;
    }
    while period < max_period && nsdf_at(signal, period + 1) > nsdf_at(signal, period) {
        period += 1;
    }

    // --- Parabolic interpolation for better precision ---
    let period_float = if period > 1 && period + 1 < signal.len() {
        let y1 = nsdf_at(signal, period - 1);
        let y2 = nsdf_at(signal, period);
        let y3 = nsdf_at(signal, period + 1);
        let denominator = y1 - 2.0 * y2 + y3;
        if denominator < 0.0 {
            let shift = (y1 - y3) / (2.0 * denominator);
            period as f64 + shift.clamp(-0.5, 0.5)
        } else {
            period as f64
        }
    } else {
        period as f64
    };

    let frequency = (sample_rate as f64 / period_float) as f32;
    if frequency.is_finite() && frequency > 0.0 {
        PitchEstimate::Frequency(frequency)
    } else {
        PitchEstimate::Silence
    }
}
