//! # Audio Clock Module
//!
//! The one piece of state shared by the tuner and metronome paths: a
//! read-only, monotonic time source measured in seconds.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Monotonic time source, in seconds since an arbitrary origin.
pub trait AudioClock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall-clock backed implementation used when no device clock exists.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    time: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self { time: Arc::new(Mutex::new(start)) }
    }

    pub fn set(&self, seconds: f64) {
        *self.time.lock().unwrap_or_else(PoisonError::into_inner) = seconds;
    }

    pub fn advance(&self, seconds: f64) {
        *self.time.lock().unwrap_or_else(PoisonError::into_inner) += seconds;
    }
}

impl AudioClock for ManualClock {
    fn now(&self) -> f64 {
        *self.time.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
