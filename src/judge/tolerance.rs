//! Tolerance windows — how far from an onset an input may land and still count.
//!
//! Both bounds scale with the length of a sixteenth note. They are floored so
//! slow tempos stay forgiving, and capped at half a sixteenth so neighbouring
//! sixteenth notes never share an input.

use crate::transport::TimeMap;

/// Early bound as a fraction of a sixteenth.
pub const EARLY_FRACTION: f64 = 0.35;
/// Late bound as a fraction of a sixteenth.
pub const LATE_FRACTION: f64 = 0.45;
/// Minimum early bound in seconds.
pub const EARLY_FLOOR_SEC: f64 = 0.030;
/// Minimum late bound in seconds.
pub const LATE_FLOOR_SEC: f64 = 0.040;
/// Neither bound may exceed this fraction of a sixteenth.
pub const MAX_FRACTION: f64 = 0.5;

/// Asymmetric acceptance window around an onset, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToleranceWindow {
    pub early_sec: f64,
    pub late_sec: f64,
}

impl ToleranceWindow {
    pub fn for_tempo(bpm: f64) -> Self {
        Self::for_sixteenth(TimeMap::new(0.0, bpm).sixteenth_sec())
    }

    pub fn for_sixteenth(sixteenth_sec: f64) -> Self {
        let cap = sixteenth_sec * MAX_FRACTION;
        Self {
            early_sec: (sixteenth_sec * EARLY_FRACTION).max(EARLY_FLOOR_SEC).min(cap),
            late_sec: (sixteenth_sec * LATE_FRACTION).max(LATE_FLOOR_SEC).min(cap),
        }
    }

    /// Whether a signed delta (`input - onset`, seconds) is accepted.
    pub fn contains(&self, delta_sec: f64) -> bool {
        delta_sec >= -self.early_sec && delta_sec <= self.late_sec
    }
}
