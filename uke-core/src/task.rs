//! # Periodic Task Module
//!
//! A cancellable, fixed-interval worker thread. Both the tuner's polling
//! cadence and the metronome's wake-up loop run on one of these instead of
//! on a display-refresh callback.
//!
//! The worker waits on a shutdown channel with a timeout, so `cancel()`
//! interrupts a pending wake-up immediately rather than after the interval.

use crossbeam_channel::{RecvTimeoutError, Sender};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Handle to a running periodic task.
#[derive(Debug)]
pub struct PeriodicTask {
    name: String,
    shutdown_tx: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
    active: Arc<AtomicBool>,
}

impl PeriodicTask {
    /// Spawns a worker that calls `tick` every `interval` until cancelled or
    /// until `tick` returns `ControlFlow::Break`.
    ///
    /// The first call happens one interval after spawning.
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let active = Arc::new(AtomicBool::new(true));
        let worker_active = Arc::clone(&active);
        let thread_name = name.to_string();

        let thread_handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            debug!(task = %thread_name, "periodic task started");
            loop {
                match shutdown_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if tick().is_break() {
                            debug!(task = %thread_name, "periodic task finished itself");
                            break;
                        }
                    }
                    // Explicit cancel, or the handle was dropped.
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            worker_active.store(false, Ordering::SeqCst);
            debug!(task = %thread_name, "periodic task exited");
        })?;

        Ok(Self {
            name: name.to_string(),
            shutdown_tx: Some(shutdown_tx),
            thread_handle: Some(thread_handle),
            active,
        })
    }

    /// True while the worker loop is still running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stops the worker and waits for an in-flight tick to finish.
    ///
    /// Safe to call repeatedly. When called from the task's own thread the
    /// join is skipped; the loop exits as soon as the current tick returns.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.thread_handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!(task = %self.name, "periodic task panicked");
            }
        }
        self.active.store(false, Ordering::SeqCst);
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn ticks_until_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let mut task = PeriodicTask::spawn("test-ticks", Duration::from_millis(1), move || {
            seen.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        })
        .unwrap();

        while count.load(Ordering::SeqCst) < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        task.cancel();
        assert!(!task.is_active());

        let after_cancel = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut task =
            PeriodicTask::spawn("test-idem", Duration::from_secs(60), || ControlFlow::Continue(()))
                .unwrap();
        task.cancel();
        task.cancel();
        assert!(!task.is_active());
    }

    #[test]
    fn cancel_interrupts_long_interval() {
        let mut task =
            PeriodicTask::spawn("test-long", Duration::from_secs(3600), || ControlFlow::Continue(()))
                .unwrap();
        let started = std::time::Instant::now();
        task.cancel();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn break_ends_the_task() {
        let mut task =
            PeriodicTask::spawn("test-break", Duration::from_millis(1), || ControlFlow::Break(()))
                .unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while task.is_active() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!task.is_active());
        task.cancel();
    }
}
