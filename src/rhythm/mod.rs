//! Rhythm buffer — a sliding window over an endless, seeded stream of bars.
//!
//! The buffer keeps [`BUFFER_DEPTH`] consecutive bars ahead of and around the
//! playhead. Each bar's onsets are pinned to absolute clock times through the
//! run's [`TimeMap`] when the bar is generated. As playback moves on, old bars
//! are evicted from the front and fresh ones appended at the back, so bar
//! indices in the window are always contiguous and ascending.

pub mod generator;
pub mod patterns;
pub mod types;

pub use generator::{generate_bar, GeneratorConfig};
pub use patterns::{library, Difficulty, Pattern};
pub use types::{Bar, BarId, Onset, OnsetId, RuntimeBar, RuntimeOnset, Tuplet, TICKS_PER_BEAT};

use std::collections::VecDeque;

use log::debug;
use thiserror::Error;

use crate::random::SeededRandom;
use crate::transport::TimeMap;

/// Bars kept in the window.
pub const BUFFER_DEPTH: usize = 6;

/// How many bars the playhead must be past the front bar before it is evicted.
pub const ADVANCE_LAG_BARS: u64 = 1;

/// Rhythm buffer errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RhythmError {
    /// Bars were requested before `initialize` gave the buffer a seed.
    #[error("rhythm buffer used before initialize() set a seed")]
    NotInitialized,
    /// No pattern fits the remaining beats at this difficulty.
    #[error("no {difficulty} pattern fits the remaining {remaining_beats} beat(s)")]
    EmptyPatternPool {
        difficulty: Difficulty,
        remaining_beats: u32,
    },
}

/// The sliding window of generated bars.
#[derive(Debug)]
pub struct RhythmBuffer {
    config: GeneratorConfig,
    seed: Option<String>,
    rng: Option<SeededRandom>,
    time_map: TimeMap,
    next_bar_index: u64,
    next_bar_id: u64,
    bars: VecDeque<RuntimeBar>,
}

impl RhythmBuffer {
    pub fn new(difficulty: Difficulty, tuplets: bool) -> Self {
        Self {
            config: GeneratorConfig::new(difficulty, tuplets),
            seed: None,
            rng: None,
            time_map: TimeMap::new(0.0, 120.0),
            next_bar_index: 0,
            next_bar_id: 0,
            bars: VecDeque::with_capacity(BUFFER_DEPTH),
        }
    }

    /// Change the pattern pool. Applies to bars generated from now on.
    pub fn set_config(&mut self, difficulty: Difficulty, tuplets: bool) {
        self.config = GeneratorConfig::new(difficulty, tuplets);
    }

    pub fn config(&self) -> GeneratorConfig {
        self.config
    }

    /// Reset the stream for `seed` and eagerly generate the lookahead bars.
    ///
    /// Onset times are computed with `time_map`, the map of the run that is
    /// about to be played. Returns the number of bars generated.
    pub fn initialize(&mut self, seed: &str, time_map: TimeMap) -> Result<usize, RhythmError> {
        self.seed = Some(seed.to_string());
        self.rng = Some(SeededRandom::new(seed));
        self.time_map = time_map;
        self.next_bar_index = 0;
        self.bars.clear();

        for _ in 0..BUFFER_DEPTH {
            self.append_bar()?;
        }
        debug!(
            "rhythm buffer initialized with seed '{seed}' ({}, tuplets {})",
            self.config.difficulty, self.config.tuplets
        );
        Ok(self.bars.len())
    }

    pub fn seed(&self) -> Option<&str> {
        self.seed.as_deref()
    }

    pub fn time_map(&self) -> TimeMap {
        self.time_map
    }

    /// Generate the next bar and append it to the back of the window.
    ///
    /// Returns the new bar's index.
    pub fn append_bar(&mut self) -> Result<u64, RhythmError> {
        let rng = self.rng.as_mut().ok_or(RhythmError::NotInitialized)?;
        let index = self.next_bar_index;
        let onsets = generate_bar(rng, self.config, index)?;

        let runtime_onsets = onsets
            .into_iter()
            .enumerate()
            .map(|(slot, onset)| {
                let time = self
                    .time_map
                    .position_to_time(index, onset.beat_index, onset.n, onset.d);
                let id = OnsetId {
                    bar_index: index,
                    slot: slot as u16,
                };
                RuntimeOnset::new(id, onset, time)
            })
            .collect();

        self.bars.push_back(RuntimeBar {
            id: BarId(self.next_bar_id),
            index,
            onsets: runtime_onsets,
        });
        self.next_bar_id += 1;
        self.next_bar_index += 1;
        Ok(index)
    }

    /// Evict the front bar.
    pub fn shift_bar(&mut self) -> Option<RuntimeBar> {
        let bar = self.bars.pop_front()?;
        debug!(
            "evicted bar {} ({} of {} onsets unhit)",
            bar.index,
            bar.unhit_count(),
            bar.onsets.len()
        );
        Some(bar)
    }

    /// Slide the window forward by one bar once the playhead at
    /// `current_bar_index` is [`ADVANCE_LAG_BARS`] past the front bar.
    ///
    /// Returns whether the window moved. Calling it again when no advance is
    /// due changes nothing.
    pub fn advance_if_needed(&mut self, current_bar_index: u64) -> Result<bool, RhythmError> {
        let Some(first) = self.first_bar_index() else {
            return Ok(false);
        };
        if current_bar_index < first + ADVANCE_LAG_BARS {
            return Ok(false);
        }
        self.append_bar()?;
        self.shift_bar();
        Ok(true)
    }

    /// Every onset not yet hit, in chronological order.
    pub fn unhit_onsets(&self) -> Vec<&RuntimeOnset> {
        self.bars
            .iter()
            .flat_map(|bar| bar.onsets.iter())
            .filter(|o| !o.is_hit())
            .collect()
    }

    /// The earliest onset not yet hit.
    pub fn next_unhit(&self) -> Option<&RuntimeOnset> {
        self.bars
            .iter()
            .flat_map(|bar| bar.onsets.iter())
            .find(|o| !o.is_hit())
    }

    pub fn onset(&self, id: OnsetId) -> Option<&RuntimeOnset> {
        self.bars
            .iter()
            .find(|bar| bar.index == id.bar_index)?
            .onsets
            .get(id.slot as usize)
    }

    /// Mark the onset `id` as hit. Returns false for unknown ids (e.g. from a
    /// previous run) and for onsets that were already hit.
    pub fn mark_hit(&mut self, id: OnsetId) -> bool {
        self.bars
            .iter_mut()
            .find(|bar| bar.index == id.bar_index)
            .and_then(|bar| bar.onsets.get_mut(id.slot as usize))
            .is_some_and(|onset| onset.id == id && onset.mark_hit())
    }

    pub fn bars(&self) -> impl Iterator<Item = &RuntimeBar> {
        self.bars.iter()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_bar_index(&self) -> Option<u64> {
        self.bars.front().map(|bar| bar.index)
    }

    pub fn last_bar_index(&self) -> Option<u64> {
        self.bars.back().map(|bar| bar.index)
    }

    /// Clock time where the last buffered bar ends.
    pub fn end_time_sec(&self) -> Option<f64> {
        self.last_bar_index()
            .map(|index| self.time_map.position_to_time(index + 1, 0, 0, 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> RhythmBuffer {
        let mut b = RhythmBuffer::new(Difficulty::Medium, false);
        b.initialize("unit", TimeMap::new(2.0, 120.0)).unwrap();
        b
    }

    fn indices(b: &RhythmBuffer) -> Vec<u64> {
        b.bars().map(|bar| bar.index).collect()
    }

    #[test]
    fn append_before_initialize_fails() {
        let mut b = RhythmBuffer::new(Difficulty::Easy, false);
        assert_eq!(b.append_bar(), Err(RhythmError::NotInitialized));
        assert_eq!(b.advance_if_needed(5), Ok(false));
    }

    #[test]
    fn initialize_fills_the_window() {
        let b = buffer();
        assert_eq!(b.len(), BUFFER_DEPTH);
        assert_eq!(indices(&b), (0..BUFFER_DEPTH as u64).collect::<Vec<_>>());
        assert_eq!(b.seed(), Some("unit"));
    }

    #[test]
    fn initialize_again_resets_indices() {
        let mut b = buffer();
        b.advance_if_needed(3).unwrap();
        b.initialize("other", TimeMap::new(0.0, 90.0)).unwrap();
        assert_eq!(b.first_bar_index(), Some(0));
        assert_eq!(b.len(), BUFFER_DEPTH);
    }

    #[test]
    fn onset_times_come_from_the_time_map() {
        let b = buffer();
        let map = b.time_map();
        for bar in b.bars() {
            for o in &bar.onsets {
                let expected =
                    map.position_to_time(bar.index, o.onset.beat_index, o.onset.n, o.onset.d);
                assert!((o.time_sec - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn unhit_onsets_are_chronological() {
        let b = buffer();
        let onsets = b.unhit_onsets();
        assert!(!onsets.is_empty());
        for pair in onsets.windows(2) {
            assert!(pair[0].time_sec < pair[1].time_sec);
        }
        assert_eq!(b.next_unhit().map(|o| o.id), onsets.first().map(|o| o.id));
    }

    #[test]
    fn mark_hit_flags_exactly_one_onset() {
        let mut b = buffer();
        let before = b.unhit_onsets().len();
        let target = b.unhit_onsets()[2].id;

        assert!(b.mark_hit(target));
        assert!(b.onset(target).unwrap().is_hit());
        assert_eq!(b.unhit_onsets().len(), before - 1);
        assert!(b.unhit_onsets().iter().all(|o| o.id != target));

        assert!(!b.mark_hit(target));
        assert_eq!(b.unhit_onsets().len(), before - 1);
    }

    #[test]
    fn mark_hit_unknown_id_is_a_no_op() {
        let mut b = buffer();
        let before = b.unhit_onsets().len();
        assert!(!b.mark_hit(OnsetId {
            bar_index: 999,
            slot: 0
        }));
        assert!(!b.mark_hit(OnsetId {
            bar_index: 1,
            slot: 400
        }));
        assert_eq!(b.unhit_onsets().len(), before);
    }

    #[test]
    fn advance_is_idempotent_when_not_due() {
        let mut b = buffer();
        assert_eq!(b.advance_if_needed(0), Ok(false));
        assert_eq!(b.advance_if_needed(0), Ok(false));
        assert_eq!(indices(&b), (0..BUFFER_DEPTH as u64).collect::<Vec<_>>());
    }

    #[test]
    fn window_stays_contiguous_while_advancing() {
        let mut b = buffer();
        for current in 0..40u64 {
            for _ in 0..3 {
                b.advance_if_needed(current).unwrap();
                let idx = indices(&b);
                assert_eq!(idx.len(), BUFFER_DEPTH);
                for pair in idx.windows(2) {
                    assert_eq!(pair[1], pair[0] + 1);
                }
            }
        }
        assert_eq!(b.first_bar_index(), Some(39));
    }

    #[test]
    fn evicted_hits_do_not_leak_into_new_bars() {
        let mut b = buffer();
        let first = b.next_unhit().unwrap().id;
        assert!(b.mark_hit(first));
        while b.first_bar_index() <= Some(first.bar_index) {
            b.advance_if_needed(first.bar_index + 10).unwrap();
        }
        assert!(b.onset(first).is_none());
        assert!(!b.mark_hit(first));
    }

    #[test]
    fn end_time_covers_the_last_bar() {
        let b = buffer();
        // 6 bars at 120 BPM = 12 s after the 2 s start.
        assert!((b.end_time_sec().unwrap() - 14.0).abs() < 1e-12);
    }
}
