//! Bar generation — fills four beats with weighted picks from the pattern pool.

use log::debug;

use crate::random::SeededRandom;
use crate::transport::BEATS_PER_BAR;

use super::patterns::{library, Difficulty, Pattern};
use super::types::Onset;
use super::RhythmError;

/// Settings that select the pattern pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    pub difficulty: Difficulty,
    pub tuplets: bool,
}

impl GeneratorConfig {
    pub fn new(difficulty: Difficulty, tuplets: bool) -> Self {
        Self {
            difficulty,
            tuplets,
        }
    }
}

/// Generate the onsets of bar `bar_index`, sorted by position.
///
/// Patterns are picked until the bar's beats are exactly filled; a pattern is
/// only eligible if it fits in the beats left. Bar 0 starts with a pattern
/// that is silent on its first beat so the player has time to react.
pub fn generate_bar(
    rng: &mut SeededRandom,
    config: GeneratorConfig,
    bar_index: u64,
) -> Result<Vec<Onset>, RhythmError> {
    let mut onsets = Vec::new();
    let mut beat = 0;

    while beat < BEATS_PER_BAR {
        let remaining = BEATS_PER_BAR - beat;
        let reaction_beat = bar_index == 0 && beat == 0;
        let candidates: Vec<&Pattern> = library()
            .iter()
            .filter(|p| p.is_eligible(config.difficulty, config.tuplets))
            .filter(|p| p.beats <= remaining)
            .filter(|p| !(reaction_beat && p.sounds_on_first_beat()))
            .collect();

        let pattern = rng
            .pick_weighted(&candidates, |p| p.weight)
            .copied()
            .ok_or(RhythmError::EmptyPatternPool {
                difficulty: config.difficulty,
                remaining_beats: remaining,
            })?;

        for &(offset, n) in pattern.hits {
            let mut onset = Onset::new(beat + offset, n, pattern.subdivision);
            if let Some(tuplet) = pattern.tuplet {
                onset = onset.with_tuplet(tuplet);
            }
            onsets.push(onset);
        }
        beat += pattern.beats;
    }

    onsets.sort_by_key(Onset::ticks_in_bar);
    debug!("generated bar {bar_index}: {} onsets", onsets.len());
    Ok(onsets)
}
