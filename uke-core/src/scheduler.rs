//! # Click Scheduler Module
//!
//! Turns beat events into playback commands ahead of time.
//!
//! Every wake-up queues all beats falling inside the lookahead window, each
//! with an explicit start time. The wake-up itself may be late by a few
//! milliseconds; the click still sounds on time because it was handed to
//! the device before it was due. Drift is bounded by the lookahead window.

use tracing::{debug, error, info};

use crate::config::{ClickConfig, MetronomeConfig, SchedulerConfig};
use crate::error::Result;
use crate::playback::PlaybackDevice;
use crate::sequencer::BeatSequencer;
use crate::synth::ClickSound;

/// Whether the scheduler is producing clicks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerStatus {
    Stopped,
    Running,
}

/// Lookahead scheduler bound to one output device.
#[derive(Debug)]
pub struct ClickScheduler<P: PlaybackDevice> {
    device: P,
    config: SchedulerConfig,
    click: ClickSound,
    /// Present only while running; dropping it resets beat time and index.
    sequencer: Option<BeatSequencer>,
}

impl<P: PlaybackDevice> ClickScheduler<P> {
    /// Renders the click once for the device's sample rate.
    pub fn new(device: P, config: SchedulerConfig, click: &ClickConfig) -> Self {
        let click = ClickSound::new(click, device.sample_rate());
        Self {
            device,
            config,
            click,
            sequencer: None,
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        if self.sequencer.is_some() {
            SchedulerStatus::Running
        } else {
            SchedulerStatus::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.sequencer.is_some()
    }

    /// Index of the last beat handed to the device; 0 when stopped or
    /// before the first beat.
    pub fn current_beat(&self) -> u32 {
        self.sequencer.as_ref().map_or(0, |s| s.state().beat_index())
    }

    pub fn sequencer(&self) -> Option<&BeatSequencer> {
        self.sequencer.as_ref()
    }

    /// Begins a fresh run with the first beat at the device's current time
    /// and queues the first lookahead window immediately.
    ///
    /// Restarting while running discards the old run entirely.
    pub fn start(&mut self, metronome: MetronomeConfig) -> Result<usize> {
        let origin = self.device.now();
        info!(bpm = metronome.bpm(), origin, "click scheduler started");
        self.sequencer = Some(BeatSequencer::new(metronome, origin));
        self.tick()
    }

    /// Stops scheduling. Clicks already queued on the device still play.
    pub fn stop(&mut self) {
        if self.sequencer.take().is_some() {
            info!("click scheduler stopped");
        }
    }

    /// One wake-up: queue every beat due before `now + lookahead`.
    ///
    /// Returns how many clicks were queued. A device failure stops the
    /// scheduler before the error is returned.
    pub fn tick(&mut self) -> Result<usize> {
        let Some(sequencer) = self.sequencer.as_mut() else {
            return Ok(0);
        };

        let deadline = self.device.now() + self.config.lookahead_secs();
        let mut queued = 0;
        while let Some(beat) = sequencer.next_before(deadline) {
            if let Err(e) = self.device.schedule_buffer(self.click.buffer(), beat.time) {
                error!(error = %e, "failed to schedule click; stopping");
                self.sequencer = None;
                return Err(e);
            }
            debug!(time = beat.time, beat = beat.beat_index, "click queued");
            queued += 1;
        }
        Ok(queued)
    }
}
