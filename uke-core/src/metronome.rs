//! # Metronome Module
//!
//! User-facing metronome: tempo control, start/stop, and an observable
//! snapshot. A `PeriodicTask` wakes the `ClickScheduler` on a fixed
//! interval; the scheduler lives behind one mutex so a wake-up and a
//! start/stop never interleave.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{error, info};

use crate::config::{ClickConfig, MetronomeConfig, SchedulerConfig, clamp_bpm};
use crate::error::{DeviceError, Result};
use crate::playback::PlaybackDevice;
use crate::scheduler::ClickScheduler;
use crate::task::PeriodicTask;

/// What a UI shows for the metronome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetronomeState {
    pub bpm: u32,
    /// Beat of the bar last queued (1-based); 0 while stopped.
    pub current_beat: u32,
    pub running: bool,
    /// Message from the last playback failure, cleared on start.
    pub error: Option<String>,
}

#[derive(Debug)]
struct Shared<P: PlaybackDevice> {
    scheduler: ClickScheduler<P>,
    config: MetronomeConfig,
    error: Option<DeviceError>,
}

/// Metronome bound to one playback device.
pub struct Metronome<P: PlaybackDevice + 'static> {
    shared: Arc<Mutex<Shared<P>>>,
    task: Option<PeriodicTask>,
    wake_interval: Duration,
}

impl<P: PlaybackDevice + 'static> Metronome<P> {
    pub fn new(device: P, config: MetronomeConfig, scheduler: SchedulerConfig, click: &ClickConfig) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                scheduler: ClickScheduler::new(device, scheduler, click),
                config,
                error: None,
            })),
            task: None,
            wake_interval: scheduler.wake_interval(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared<P>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bpm(&self) -> u32 {
        self.lock().config.bpm()
    }

    pub fn is_running(&self) -> bool {
        self.lock().scheduler.is_running()
    }

    pub fn state(&self) -> MetronomeState {
        let shared = self.lock();
        MetronomeState {
            bpm: shared.config.bpm(),
            current_beat: shared.scheduler.current_beat(),
            running: shared.scheduler.is_running(),
            error: shared.error.as_ref().map(DeviceError::user_message),
        }
    }

    /// Sets the tempo, clamped to the supported range. A running metronome
    /// is stopped and restarted from beat 1 at the new tempo.
    pub fn set_bpm(&mut self, bpm: i64) -> Result<()> {
        let clamped = clamp_bpm(bpm);
        let was_running = self.is_running();
        if was_running {
            self.stop();
        }
        {
            let mut shared = self.lock();
            shared.config = shared.config.with_bpm(clamped as i64);
        }
        info!(requested = bpm, bpm = clamped, "tempo changed");
        if was_running { self.start() } else { Ok(()) }
    }

    /// Steps the tempo by `delta` beats per minute.
    pub fn nudge_bpm(&mut self, delta: i64) -> Result<()> {
        let current = self.bpm() as i64;
        self.set_bpm(current + delta)
    }

    /// Starts clicking. The first lookahead window is queued before this
    /// returns, so a broken device is reported here.
    pub fn start(&mut self) -> Result<()> {
        if self.task.as_ref().is_some_and(PeriodicTask::is_active) && self.is_running() {
            return Ok(());
        }
        if let Some(mut stale) = self.task.take() {
            stale.cancel();
        }

        {
            let mut shared = self.lock();
            shared.error = None;
            let config = shared.config;
            if let Err(e) = shared.scheduler.start(config) {
                shared.error = Some(e.clone());
                return Err(e);
            }
        }

        let shared = Arc::clone(&self.shared);
        let task = PeriodicTask::spawn("uke-metronome", self.wake_interval, move || {
            let mut shared = shared.lock().unwrap_or_else(PoisonError::into_inner);
            match shared.scheduler.tick() {
                Ok(_) if shared.scheduler.is_running() => ControlFlow::Continue(()),
                Ok(_) => ControlFlow::Break(()),
                Err(e) => {
                    error!(error = %e, "metronome stopped by playback failure");
                    shared.error = Some(e);
                    ControlFlow::Break(())
                }
            }
        });

        match task {
            Ok(task) => {
                self.task = Some(task);
                Ok(())
            }
            Err(e) => {
                let mut shared = self.lock();
                shared.scheduler.stop();
                let err = DeviceError::StreamFailed(format!("failed to spawn scheduler thread: {e}"));
                shared.error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Stops clicking. Any pending wake-up is cancelled before this returns.
    pub fn stop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.cancel();
        }
        self.lock().scheduler.stop();
    }

    /// Runs one scheduling pass on the caller's thread.
    pub fn tick(&mut self) -> Result<usize> {
        let mut shared = self.lock();
        let result = shared.scheduler.tick();
        if let Err(e) = &result {
            shared.error = Some(e.clone());
        }
        result
    }
}

impl<P: PlaybackDevice + 'static> Drop for Metronome<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{AudioClock, ManualClock};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Clone, Default)]
    struct FakeOutput {
        clock: ManualClock,
        scheduled: Arc<Mutex<Vec<f64>>>,
        fail: Arc<AtomicBool>,
    }

    impl AudioClock for FakeOutput {
        fn now(&self) -> f64 {
            self.clock.now()
        }
    }

    impl PlaybackDevice for FakeOutput {
        fn sample_rate(&self) -> u32 {
            44_100
        }

        fn schedule_buffer(&self, _buffer: Arc<[f32]>, start_at: f64) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DeviceError::PlaybackFailed("gone".into()));
            }
            self.scheduled.lock().unwrap().push(start_at);
            Ok(())
        }
    }

    fn metronome(output: &FakeOutput) -> Metronome<FakeOutput> {
        Metronome::new(
            output.clone(),
            MetronomeConfig::default(),
            SchedulerConfig::default(),
            &ClickConfig::default(),
        )
    }

    #[test]
    fn set_bpm_clamps_silently() {
        let output = FakeOutput::default();
        let mut m = metronome(&output);
        m.set_bpm(300).unwrap();
        assert_eq!(m.bpm(), 240);
        m.set_bpm(5).unwrap();
        assert_eq!(m.bpm(), 40);
        m.nudge_bpm(-5).unwrap();
        assert_eq!(m.bpm(), 40);
        m.nudge_bpm(5).unwrap();
        assert_eq!(m.bpm(), 45);
    }

    #[test]
    fn start_and_stop_update_state() {
        let output = FakeOutput::default();
        let mut m = metronome(&output);
        assert_eq!(
            m.state(),
            MetronomeState { bpm: 100, current_beat: 0, running: false, error: None }
        );
        m.start().unwrap();
        let state = m.state();
        assert!(state.running);
        assert_eq!(state.current_beat, 1);
        m.stop();
        m.stop();
        assert_eq!(m.state().current_beat, 0);
        assert!(!m.state().running);
    }

    #[test]
    fn tempo_change_while_running_restarts_from_beat_one() {
        let output = FakeOutput::default();
        let mut m = metronome(&output);
        m.set_bpm(240).unwrap();
        m.start().unwrap();
        output.clock.advance(0.6);
        m.tick().unwrap();
        assert!(m.state().current_beat > 1);

        m.set_bpm(60).unwrap();
        let state = m.state();
        assert!(state.running);
        assert_eq!(state.bpm, 60);
        assert_eq!(state.current_beat, 1);
        m.stop();
    }

    #[test]
    fn playback_failure_on_start_is_reported() {
        let output = FakeOutput::default();
        output.fail.store(true, Ordering::SeqCst);
        let mut m = metronome(&output);
        assert!(matches!(m.start(), Err(DeviceError::PlaybackFailed(_))));
        let state = m.state();
        assert!(!state.running);
        assert!(state.error.is_some());
    }

    #[test]
    fn playback_failure_on_tick_stops_metronome() {
        let output = FakeOutput::default();
        let mut m = metronome(&output);
        m.start().unwrap();
        output.fail.store(true, Ordering::SeqCst);
        output.clock.advance(1.0);
        // Either the background wake-up or this call hits the failure first.
        let _ = m.tick();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while m.is_running() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let state = m.state();
        assert!(!state.running);
        assert!(state.error.is_some());

        output.fail.store(false, Ordering::SeqCst);
        m.start().unwrap();
        assert!(m.state().running);
        assert_eq!(m.state().error, None);
        m.stop();
    }
}
