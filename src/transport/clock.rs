//! Authoritative time sources for the transport.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use super::TransportError;

/// A monotonic clock measured in seconds.
///
/// Every musical time in a run is derived from this clock, never from
/// accumulated timer deltas.
pub trait Clock {
    /// Current time in seconds. Must never go backwards.
    fn now(&self) -> f64;

    /// Make sure the clock is ticking before a run starts.
    ///
    /// Sources backed by hardware (an audio device) fail here when the device
    /// is gone; the transport then refuses to start.
    fn resume(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Wall-clock based monotonic clock, zeroed at construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
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
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock. Clones share the same time, so a test can keep one
/// handle and advance the clock a transport owns.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    time: Rc<Cell<f64>>,
    unavailable: Rc<Cell<bool>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(seconds: f64) -> Self {
        let clock = Self::default();
        clock.set(seconds);
        clock
    }

    /// Jump to an absolute time. Times earlier than the current one are ignored.
    pub fn set(&self, seconds: f64) {
        if seconds > self.time.get() {
            self.time.set(seconds);
        }
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.time.get() + seconds);
    }

    /// Simulate a clock source that cannot be resumed.
    pub fn set_available(&self, available: bool) {
        self.unavailable.set(!available);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.time.get()
    }

    fn resume(&self) -> Result<(), TransportError> {
        if self.unavailable.get() {
            Err(TransportError::ClockUnavailable(
                "manual clock marked unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}
