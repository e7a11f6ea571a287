//! Built-in pattern library and difficulty levels.
//!
//! A pattern covers one or two beats. Its hits are `(beat_offset, n)` pairs on
//! a grid of `subdivision` slots per beat. Difficulty never changes how bars
//! are assembled, only which patterns are eligible.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::types::Tuplet;

/// Difficulty levels, from sparse quarter/eighth rhythms to quintuplets.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
    Expert,
}

impl Difficulty {
    pub fn all() -> &'static [Difficulty] {
        &[
            Difficulty::Easy,
            Difficulty::Medium,
            Difficulty::Hard,
            Difficulty::Expert,
        ]
    }

    /// Numeric value used by challenge tokens (1..=4).
    pub fn value(self) -> u8 {
        match self {
            Difficulty::Easy => 1,
            Difficulty::Medium => 2,
            Difficulty::Hard => 3,
            Difficulty::Expert => 4,
        }
    }

    pub fn from_value(value: u8) -> Option<Self> {
        Self::all().iter().copied().find(|d| d.value() == value)
    }

    pub fn label(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::Expert => "expert",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if let Ok(value) = lower.parse::<u8>() {
            return Self::from_value(value).ok_or_else(|| format!("unknown difficulty value {value}"));
        }
        Self::all()
            .iter()
            .copied()
            .find(|d| d.label() == lower)
            .ok_or_else(|| format!("unknown difficulty '{s}'"))
    }
}

/// A reusable rhythmic cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pattern {
    pub name: &'static str,
    /// Beats covered: 1 or 2.
    pub beats: u32,
    /// Grid slots per beat.
    pub subdivision: u32,
    /// `(beat_offset, n)` hits, `beat_offset < beats`, `n < subdivision`.
    pub hits: &'static [(u32, u32)],
    /// Relative selection weight.
    pub weight: u32,
    pub difficulties: &'static [Difficulty],
    /// Set when the pattern is written with tuplet brackets.
    pub tuplet: Option<Tuplet>,
}

impl Pattern {
    pub fn is_eligible(&self, difficulty: Difficulty, tuplets: bool) -> bool {
        self.difficulties.contains(&difficulty) && (tuplets || self.tuplet.is_none())
    }

    /// Whether any hit lands inside the pattern's first beat.
    pub fn sounds_on_first_beat(&self) -> bool {
        self.hits.iter().any(|&(offset, _)| offset == 0)
    }
}

const ALL: &[Difficulty] = &[
    Difficulty::Easy,
    Difficulty::Medium,
    Difficulty::Hard,
    Difficulty::Expert,
];
const MEDIUM_UP: &[Difficulty] = &[Difficulty::Medium, Difficulty::Hard, Difficulty::Expert];
const HARD_UP: &[Difficulty] = &[Difficulty::Hard, Difficulty::Expert];
const EXPERT: &[Difficulty] = &[Difficulty::Expert];

const TRIPLET: Option<Tuplet> = Some(Tuplet {
    num_notes: 3,
    notes_occupied: 1,
});
const HALF_BAR_TRIPLET: Option<Tuplet> = Some(Tuplet {
    num_notes: 3,
    notes_occupied: 2,
});
const QUINTUPLET: Option<Tuplet> = Some(Tuplet {
    num_notes: 5,
    notes_occupied: 1,
});

const fn cell(
    name: &'static str,
    beats: u32,
    subdivision: u32,
    hits: &'static [(u32, u32)],
    weight: u32,
    difficulties: &'static [Difficulty],
    tuplet: Option<Tuplet>,
) -> Pattern {
    Pattern {
        name,
        beats,
        subdivision,
        hits,
        weight,
        difficulties,
        tuplet,
    }
}

static LIBRARY: &[Pattern] = &[
    // one beat, sixteenth grid
    cell("quarter rest", 1, 4, &[], 2, ALL, None),
    cell("quarter", 1, 4, &[(0, 0)], 6, ALL, None),
    cell("two eighths", 1, 4, &[(0, 0), (0, 2)], 5, ALL, None),
    cell("offbeat eighth", 1, 4, &[(0, 2)], 3, ALL, None),
    cell("four sixteenths", 1, 4, &[(0, 0), (0, 1), (0, 2), (0, 3)], 3, MEDIUM_UP, None),
    cell("eighth two sixteenths", 1, 4, &[(0, 0), (0, 2), (0, 3)], 3, MEDIUM_UP, None),
    cell("two sixteenths eighth", 1, 4, &[(0, 0), (0, 1), (0, 2)], 3, MEDIUM_UP, None),
    cell("dotted eighth sixteenth", 1, 4, &[(0, 0), (0, 3)], 2, HARD_UP, None),
    cell("sixteenth dotted eighth", 1, 4, &[(0, 0), (0, 1)], 2, HARD_UP, None),
    cell("rest three sixteenths", 1, 4, &[(0, 1), (0, 2), (0, 3)], 2, HARD_UP, None),
    cell("offbeat sixteenths", 1, 4, &[(0, 1), (0, 3)], 2, EXPERT, None),
    // one beat, tuplet grids
    cell("eighth triplet", 1, 3, &[(0, 0), (0, 1), (0, 2)], 2, MEDIUM_UP, TRIPLET),
    cell("triplet first and last", 1, 3, &[(0, 0), (0, 2)], 2, HARD_UP, TRIPLET),
    cell("rest two triplets", 1, 3, &[(0, 1), (0, 2)], 1, EXPERT, TRIPLET),
    cell("quintuplet", 1, 5, &[(0, 0), (0, 1), (0, 2), (0, 3), (0, 4)], 1, EXPERT, QUINTUPLET),
    // two beats
    cell("half note", 2, 4, &[(0, 0)], 3, ALL, None),
    cell("dotted quarter eighth", 2, 4, &[(0, 0), (1, 2)], 2, ALL, None),
    cell("eighth quarter eighth", 2, 4, &[(0, 0), (0, 2), (1, 2)], 2, MEDIUM_UP, None),
    cell("syncopated sixteenths", 2, 4, &[(0, 0), (0, 3), (1, 2)], 1, HARD_UP, None),
    cell("quarter triplet", 2, 3, &[(0, 0), (0, 2), (1, 1)], 2, HARD_UP, HALF_BAR_TRIPLET),
];

/// Every built-in pattern.
pub fn library() -> &'static [Pattern] {
    LIBRARY
}
