//! # Configuration Module
//!
//! Tunable parameters for the tuner and metronome, loadable from a JSON
//! file. Every field has a default so partial files are accepted.
//!
//! The silence threshold and match tolerance are empirical values for a
//! typical microphone; they are exposed here rather than derived.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::tuning::{self, TargetNote};

/// Slowest tempo the metronome accepts.
pub const MIN_BPM: u32 = 40;
/// Fastest tempo the metronome accepts.
pub const MAX_BPM: u32 = 240;
/// Tempo used when nothing else is configured.
pub const DEFAULT_BPM: u32 = 100;
/// Beats in one bar. Only 4/4 is supported.
pub const BEATS_PER_BAR: u32 = 4;

/// Root configuration, one section per tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub tuner: TunerConfig,
    pub metronome: MetronomeConfig,
    pub scheduler: SchedulerConfig,
    pub click: ClickConfig,
}

impl ToolsConfig {
    /// Load a configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_json(&contents)
    }

    /// Parse and validate a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize configuration to JSON")
    }

    /// Save configuration to a JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = self.to_json()?;
        fs::write(path.as_ref(), json)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))
    }

    /// Rejects values the audio core cannot work with.
    pub fn validate(&self) -> Result<()> {
        let tuner = &self.tuner;
        if !tuner.frame_size.is_power_of_two() {
            bail!("tuner.frame_size must be a power of two (got {})", tuner.frame_size);
        }
        if tuner.targets.is_empty() {
            bail!("tuner.targets must name at least one note");
        }
        if tuner.min_frequency <= 0.0 || tuner.max_frequency <= tuner.min_frequency {
            bail!(
                "tuner frequency band is invalid ({} - {} Hz)",
                tuner.min_frequency,
                tuner.max_frequency
            );
        }
        if tuner.targets.iter().any(|t| t.frequency <= 0.0) {
            bail!("tuner target frequencies must be positive");
        }
        if tuner.poll_interval_ms == 0 || self.scheduler.wake_interval_ms == 0 {
            bail!("polling and wake intervals must be non-zero");
        }
        if self.scheduler.lookahead_ms == 0 {
            bail!("scheduler.lookahead_ms must be non-zero");
        }
        if self.click.frequency <= 0.0 || self.click.duration_ms == 0 {
            bail!("click tone needs a positive frequency and duration");
        }
        Ok(())
    }
}

/// Tuner detection and polling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Samples per analysed frame (power of two).
    pub frame_size: usize,
    /// RMS below which a frame counts as silence.
    pub silence_threshold: f32,
    /// Lowest frequency searched, in Hz.
    pub min_frequency: f32,
    /// Highest frequency searched, in Hz.
    pub max_frequency: f32,
    /// Largest |cents| still reported as a match.
    pub match_tolerance_cents: f32,
    /// Largest |cents| reported as "in tune".
    pub in_tune_cents: f32,
    pub poll_interval_ms: u64,
    pub targets: Vec<TargetNote>,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            frame_size: 2048,
            silence_threshold: 0.01,
            min_frequency: 200.0,
            max_frequency: 600.0,
            match_tolerance_cents: 70.0,
            in_tune_cents: 5.0,
            poll_interval_ms: 16,
            targets: tuning::ukulele_standard(),
        }
    }
}

impl TunerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Tempo settings. Values outside [`MIN_BPM`, `MAX_BPM`] are clamped, both
/// when constructed in code and when read from a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetronomeConfig {
    #[serde(default = "default_bpm", deserialize_with = "deserialize_clamped_bpm")]
    bpm: u32,
    #[serde(skip, default = "default_beats_per_bar")]
    beats_per_bar: u32,
}

impl MetronomeConfig {
    pub fn new(bpm: i64) -> Self {
        Self {
            bpm: clamp_bpm(bpm),
            beats_per_bar: BEATS_PER_BAR,
        }
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.beats_per_bar
    }

    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.bpm as f64
    }

    /// Returns a copy with a new (clamped) tempo.
    pub fn with_bpm(self, bpm: i64) -> Self {
        Self { bpm: clamp_bpm(bpm), ..self }
    }
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BPM as i64)
    }
}

/// Clamps any integer tempo into the supported range.
pub fn clamp_bpm(bpm: i64) -> u32 {
    bpm.clamp(MIN_BPM as i64, MAX_BPM as i64) as u32
}

fn default_bpm() -> u32 {
    DEFAULT_BPM
}

fn default_beats_per_bar() -> u32 {
    BEATS_PER_BAR
}

fn deserialize_clamped_bpm<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(clamp_bpm(raw))
}

/// Lookahead loop timing for the click scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often the scheduler wakes up.
    pub wake_interval_ms: u64,
    /// How far past "now" beats are queued on each wake.
    pub lookahead_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            wake_interval_ms: 25,
            lookahead_ms: 100,
        }
    }
}

impl SchedulerConfig {
    pub fn wake_interval(&self) -> Duration {
        Duration::from_millis(self.wake_interval_ms)
    }

    pub fn lookahead_secs(&self) -> f64 {
        self.lookahead_ms as f64 / 1000.0
    }
}

/// The metronome click tone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickConfig {
    pub frequency: f32,
    pub duration_ms: u64,
    pub gain: f32,
}

impl Default for ClickConfig {
    fn default() -> Self {
        Self {
            frequency: 880.0,
            duration_ms: 100,
            gain: 0.5,
        }
    }
}

impl ClickConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bpm_is_clamped_on_construction() {
        assert_eq!(MetronomeConfig::new(300).bpm(), 240);
        assert_eq!(MetronomeConfig::new(5).bpm(), 40);
        assert_eq!(MetronomeConfig::new(-20).bpm(), 40);
        assert_eq!(MetronomeConfig::new(120).bpm(), 120);
        assert_eq!(MetronomeConfig::default().bpm(), DEFAULT_BPM);
    }

    #[test]
    fn bpm_is_clamped_when_loaded() {
        let config = ToolsConfig::from_json(r#"{ "metronome": { "bpm": 999 } }"#).unwrap();
        assert_eq!(config.metronome.bpm(), MAX_BPM);
        assert_eq!(config.metronome.beats_per_bar(), BEATS_PER_BAR);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config = ToolsConfig::from_json(r#"{ "tuner": { "silence_threshold": 0.02 } }"#).unwrap();
        assert_eq!(config.tuner.silence_threshold, 0.02);
        assert_eq!(config.tuner.frame_size, 2048);
        assert_eq!(config.tuner.targets.len(), 4);
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn rejects_non_power_of_two_frame() {
        let err = ToolsConfig::from_json(r#"{ "tuner": { "frame_size": 1000 } }"#).unwrap_err();
        assert!(err.to_string().contains("power of two"));
    }

    #[test]
    fn rejects_inverted_band() {
        let json = r#"{ "tuner": { "min_frequency": 600.0, "max_frequency": 200.0 } }"#;
        assert!(ToolsConfig::from_json(json).is_err());
    }

    #[test]
    fn json_round_trip_preserves_values() {
        let mut config = ToolsConfig::default();
        config.metronome = config.metronome.with_bpm(72);
        config.tuner.match_tolerance_cents = 50.0;
        let parsed = ToolsConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn seconds_per_beat_matches_tempo() {
        assert_eq!(MetronomeConfig::new(120).seconds_per_beat(), 0.5);
        assert_eq!(MetronomeConfig::new(60).seconds_per_beat(), 1.0);
    }
}
