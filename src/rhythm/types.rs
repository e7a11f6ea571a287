//! Onset data model — where notes fall inside a bar, and their runtime state.

use serde::{Deserialize, Serialize};

use crate::transport::BEATS_PER_BAR;

/// Ticks per beat used for exact ordering of onsets. 960 divides evenly by
/// every supported subdivision (2, 3, 4, 5, 6, 8).
pub const TICKS_PER_BEAT: u64 = 960;

/// Bracket notation for a tuplet group: `num_notes` in the time of `notes_occupied` beats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tuplet {
    pub num_notes: u8,
    pub notes_occupied: u8,
}

/// A note at a rational position inside a 4-beat bar: `beat_index + n / d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Onset {
    /// Beat within the bar, `0..BEATS_PER_BAR`.
    pub beat_index: u32,
    /// Numerator, always `< d`.
    pub n: u32,
    /// Slots per beat: 4 is the sixteenth grid, 3 and 5 are tuplet grids.
    pub d: u32,
    pub tuplet: Option<Tuplet>,
}

impl Onset {
    pub fn new(beat_index: u32, n: u32, d: u32) -> Self {
        debug_assert!(d > 0 && n < d, "onset {n}/{d} out of range");
        debug_assert!(beat_index < BEATS_PER_BAR);
        Self {
            beat_index,
            n,
            d,
            tuplet: None,
        }
    }

    pub fn with_tuplet(mut self, tuplet: Tuplet) -> Self {
        self.tuplet = Some(tuplet);
        self
    }

    /// Position in beats from the start of the bar.
    pub fn normalized(&self) -> f64 {
        self.beat_index as f64 + self.n as f64 / self.d as f64
    }

    /// Exact position in ticks from the start of the bar.
    pub fn ticks_in_bar(&self) -> u64 {
        self.beat_index as u64 * TICKS_PER_BEAT + self.n as u64 * TICKS_PER_BEAT / self.d as u64
    }
}

/// Opaque identity of a generated bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BarId(pub(crate) u64);

/// One generated bar: time-sorted onsets that never change after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bar {
    pub id: BarId,
    pub onsets: Vec<Onset>,
}

/// Identity of one onset in a run: its bar index and slot within the bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OnsetId {
    pub bar_index: u64,
    pub slot: u16,
}

/// An onset placed on the clock, with its hit state.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeOnset {
    pub id: OnsetId,
    pub onset: Onset,
    /// Absolute clock time, fixed when the bar was generated.
    pub time_sec: f64,
    hit: bool,
}

impl RuntimeOnset {
    pub(crate) fn new(id: OnsetId, onset: Onset, time_sec: f64) -> Self {
        Self {
            id,
            onset,
            time_sec,
            hit: false,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.hit
    }

    /// Flip `hit` to true. Returns false if it already was.
    pub(crate) fn mark_hit(&mut self) -> bool {
        if self.hit {
            return false;
        }
        self.hit = true;
        true
    }
}

/// A bar in the sliding window: content plus absolute index and runtime onsets.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeBar {
    pub id: BarId,
    /// Absolute bar index in the run, starting at 0.
    pub index: u64,
    pub onsets: Vec<RuntimeOnset>,
}

impl RuntimeBar {
    /// The immutable bar content.
    pub fn bar(&self) -> Bar {
        Bar {
            id: self.id,
            onsets: self.onsets.iter().map(|o| o.onset).collect(),
        }
    }

    pub fn unhit_count(&self) -> usize {
        self.onsets.iter().filter(|o| !o.is_hit()).count()
    }
}
