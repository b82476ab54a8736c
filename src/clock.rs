//! The monotonic timestamp source the manager consumes. Expressed as a
//! small trait rather than a bare `Instant` so tests can drive
//! retry-time gating deterministically without sleeping real
//! wall-clock time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A source of monotonically non-decreasing milliseconds.
///
/// The manager never interprets the value beyond comparing it to other
/// values from the same clock, so any monotonic counter works.
pub trait UndoClock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// The default clock: wall-clock-adjacent but monotonic, backed by
/// [`std::time::Instant`].
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoClock for SystemClock {
    fn now_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// A clock a test can advance explicitly, so retry-time gating and
/// backoff delays can be exercised at precise instants without a real
/// sleep.
#[derive(Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            millis: AtomicU64::new(0),
        }
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl UndoClock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}
