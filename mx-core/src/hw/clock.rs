//! Delays
//!
//! Every sleep in the fabric (reset pulses, settle times, lock polling, the
//! backoff ladder) goes through a [`Clock`].

use parking_lot::Mutex;
use std::time::Duration;

pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Blocks the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Records requested sleeps and returns immediately
#[derive(Debug, Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the recorded sleeps
    pub fn take(&self) -> Vec<Duration> {
        std::mem::take(&mut *self.sleeps.lock())
    }

    pub fn total(&self) -> Duration {
        self.sleeps.lock().iter().sum()
    }
}

impl Clock for RecordingClock {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        std::thread::yield_now();
    }
}
