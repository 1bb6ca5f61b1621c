//! Injectable clock for deterministic time handling.

use std::sync::Arc;

use parking_lot::Mutex;

/// Time source abstraction.
///
/// Every component that compares timestamps takes a `Arc<dyn Clock>` so
/// tests can drive time manually instead of sleeping.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time as milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Wall-clock implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: Mutex<u64>,
}

impl ManualClock {
    /// Create a manual clock starting at the given epoch milliseconds.
    pub fn new(start_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            now_ms: Mutex::new(start_ms),
        })
    }

    /// Advance the clock by the given number of milliseconds.
    pub fn advance_ms(&self, delta: u64) {
        *self.now_ms.lock() += delta;
    }

    /// Set the clock to an absolute time.
    pub fn set_ms(&self, now: u64) {
        *self.now_ms.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        *self.now_ms.lock()
    }
}
