//! # Beat Sequencer Module
//!
//! Pure tempo arithmetic for the metronome: when is the next beat, and
//! which beat of the bar is it.
//!
//! Beat `n` is placed at `origin + n * seconds_per_beat` rather than by
//! repeatedly adding the beat length, so rounding never accumulates.

use crate::config::MetronomeConfig;

/// One click to be played.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatEvent {
    /// Absolute start time on the audio clock, in seconds.
    pub time: f64,
    /// Position in the bar, 1-based.
    pub beat_index: u32,
}

/// Scheduling progress. The only copy of "where are we" in the metronome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerState {
    origin: f64,
    beats_scheduled: u64,
    beat_index: u32,
}

impl SchedulerState {
    fn fresh(origin: f64) -> Self {
        Self {
            origin,
            beats_scheduled: 0,
            beat_index: 0,
        }
    }

    /// Time of the first beat of this run.
    pub fn origin(&self) -> f64 {
        self.origin
    }

    /// Index of the most recently scheduled beat; 0 before the first one.
    pub fn beat_index(&self) -> u32 {
        self.beat_index
    }

    /// Beats handed out since `origin`.
    pub fn beats_scheduled(&self) -> u64 {
        self.beats_scheduled
    }
}

/// Produces beat events for a fixed tempo, in order, each exactly once.
#[derive(Debug, Clone)]
pub struct BeatSequencer {
    config: MetronomeConfig,
    state: SchedulerState,
}

impl BeatSequencer {
    /// Starts a run whose first beat falls at `start_time`.
    pub fn new(config: MetronomeConfig, start_time: f64) -> Self {
        Self {
            config,
            state: SchedulerState::fresh(start_time),
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn seconds_per_beat(&self) -> f64 {
        self.config.seconds_per_beat()
    }

    /// Time of the next beat that has not been handed out yet.
    pub fn next_beat_time(&self) -> f64 {
        self.state.origin + self.state.beats_scheduled as f64 * self.seconds_per_beat()
    }

    /// Index the next beat will carry.
    pub fn next_beat_index(&self) -> u32 {
        self.state.beat_index % self.config.beats_per_bar() + 1
    }

    /// Hands out the next beat if it is due before `deadline`.
    pub fn next_before(&mut self, deadline: f64) -> Option<BeatEvent> {
        let time = self.next_beat_time();
        if time >= deadline {
            return None;
        }
        let beat_index = self.next_beat_index();
        self.state.beat_index = beat_index;
        self.state.beats_scheduled += 1;
        Some(BeatEvent { time, beat_index })
    }

    /// All beats due before `now + horizon`.
    ///
    /// Beats that fell behind `now` (a late wake-up) are still produced so
    /// the bar count never skips; the output device plays them immediately.
    pub fn events_within(&mut self, now: f64, horizon: f64) -> Vec<BeatEvent> {
        let deadline = now + horizon;
        std::iter::from_fn(|| self.next_before(deadline)).collect()
    }
}
