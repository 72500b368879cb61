//! Local monotonic clock abstraction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic time source in seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Wall monotonic clock, zero at construction
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Manually driven clock for deterministic tests (microsecond resolution)
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn new(start_s: f64) -> Self {
        Self {
            micros: AtomicU64::new(to_micros(start_s)),
        }
    }

    pub fn set(&self, seconds: f64) {
        self.micros.store(to_micros(seconds), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        self.micros.fetch_add(to_micros(seconds), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1e6
    }
}

fn to_micros(seconds: f64) -> u64 {
    (seconds.max(0.0) * 1e6).round() as u64
}
