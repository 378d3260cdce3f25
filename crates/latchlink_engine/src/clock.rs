//! Monotonic millisecond clocks.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Source of the engine's notion of time.
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin, never decreasing.
    fn now_ms(&self) -> u64;
}

/// Wall clock measured from construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Starts a clock at zero.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Manually advanced clock.
///
/// Clones share the same time, so a test can keep one handle while the
/// engine owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    /// Creates a clock reading `start` milliseconds.
    pub fn new(start: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    /// Moves time forward.
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }

    /// Jumps to an absolute time. Ignored if it would go backwards.
    pub fn set(&self, ms: u64) {
        if ms > self.now.get() {
            self.now.set(ms);
        }
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}
