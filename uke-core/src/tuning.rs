//! # Musical Tuning Module
//!
//! Maps a detected frequency onto the nearest string of the instrument and
//! reports how far off it is in cents.
//!
//! ## Features
//! - Standard GCEA ukulele targets
//! - Cent deviation calculations for tuning accuracy
//! - Status classification (in tune / sharp / flat / no signal)
//! - Meter helpers for drawing a needle

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::config::TunerConfig;
use crate::pitch::PitchEstimate;

/// A string the tuner knows how to tune.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetNote {
    /// Note label (e.g., "G", "C")
    pub label: String,
    /// Reference frequency in Hz
    pub frequency: f32,
}

impl TargetNote {
    pub fn new(label: impl Into<String>, frequency: f32) -> Self {
        Self { label: label.into(), frequency }
    }
}

/// Standard re-entrant GCEA tuning: G4, C4, E4, A4.
static UKULELE_STANDARD: Lazy<Vec<TargetNote>> = Lazy::new(|| {
    vec![
        TargetNote::new("G", 392.00),
        TargetNote::new("C", 261.63),
        TargetNote::new("E", 329.63),
        TargetNote::new("A", 440.00),
    ]
});

/// Returns the four open-string targets of a standard-tuned ukulele.
pub fn ukulele_standard() -> Vec<TargetNote> {
    UKULELE_STANDARD.clone()
}

/// Calculates the deviation from a target frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
///
/// # Arguments
/// * `freq` - Measured frequency in Hz
/// * `target_freq` - Target frequency in Hz
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f64 {
    1200.0 * (freq as f64 / target_freq as f64).log2()
}

/// The string a frequency was matched to.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteMatch {
    pub label: String,
    /// Signed deviation; positive is sharp.
    pub cents: f64,
}

/// Finds the closest target string for a pitch estimate.
#[derive(Debug, Clone)]
pub struct NoteMapper {
    targets: Vec<TargetNote>,
    tolerance_cents: f64,
}

impl NoteMapper {
    pub fn new(targets: Vec<TargetNote>, tolerance_cents: f64) -> Self {
        Self { targets, tolerance_cents }
    }

    pub fn from_config(config: &TunerConfig) -> Self {
        Self::new(config.targets.clone(), config.match_tolerance_cents as f64)
    }

    /// Matches a frequency to the target with the smallest |cents|.
    ///
    /// Returns `None` for silence, or when even the closest target is at
    /// least `tolerance_cents` away.
    pub fn map(&self, estimate: PitchEstimate) -> Option<NoteMatch> {
        let frequency = estimate.frequency()?;

        let (target, cents) = self
            .targets
            .iter()
            .map(|t| (t, calculate_cents_deviation(frequency, t.frequency)))
            .filter(|(_, cents)| cents.is_finite())
            .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))?;

        if cents.abs() < self.tolerance_cents {
            Some(NoteMatch { label: target.label.clone(), cents })
        } else {
            None
        }
    }
}

/// User-facing classification of one tuning reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningStatus {
    InTune,
    Sharp,
    Flat,
    NoSignal,
}

impl TuningStatus {
    /// Classifies a match: within `in_tune_cents` is in tune, otherwise the
    /// sign of the deviation decides.
    pub fn classify(matched: Option<&NoteMatch>, in_tune_cents: f64) -> Self {
        match matched {
            None => TuningStatus::NoSignal,
            Some(m) if m.cents.abs() < in_tune_cents => TuningStatus::InTune,
            Some(m) if m.cents > 0.0 => TuningStatus::Sharp,
            Some(_) => TuningStatus::Flat,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            TuningStatus::NoSignal => "Pluck a string!",
            TuningStatus::InTune => "In Tune!",
            TuningStatus::Sharp => "Too Sharp!",
            TuningStatus::Flat => "Too Flat!",
        }
    }
}

/// Outcome of analysing one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningResult {
    /// Matched string label, `None` when nothing matched.
    pub note: Option<String>,
    /// Signed cents from the matched string; 0.0 when unmatched.
    pub cents_deviation: f64,
    pub status: TuningStatus,
    /// Raw detected frequency, if any, even when it matched nothing.
    pub frequency: Option<f32>,
}

impl TuningResult {
    pub fn no_signal() -> Self {
        Self {
            note: None,
            cents_deviation: 0.0,
            status: TuningStatus::NoSignal,
            frequency: None,
        }
    }

    pub fn from_match(estimate: PitchEstimate, matched: Option<NoteMatch>, in_tune_cents: f64) -> Self {
        let status = TuningStatus::classify(matched.as_ref(), in_tune_cents);
        match matched {
            Some(m) => Self {
                note: Some(m.label),
                cents_deviation: m.cents,
                status,
                frequency: estimate.frequency(),
            },
            None => Self {
                frequency: estimate.frequency(),
                ..Self::no_signal()
            },
        }
    }
}

/// Needle position for a cents meter, clamped to [-100, 100].
pub fn indicator_position(cents: f64) -> f64 {
    cents.clamp(-100.0, 100.0)
}

/// Colour band of the meter needle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterZone {
    InTune,
    Close,
    Off,
}

impl MeterZone {
    pub fn from_cents(cents: f64) -> Self {
        let magnitude = cents.abs();
        if magnitude < 5.0 {
            MeterZone::InTune
        } else if magnitude < 20.0 {
            MeterZone::Close
        } else {
            MeterZone::Off
        }
    }
}
