//! Status bar — displays tempo, seed, difficulty, position and latency offset.

use crate::rhythm::Difficulty;
use crate::transport::Position;

/// Status information for the TUI status bar.
#[derive(Debug, Clone)]
pub struct StatusInfo {
    pub bpm: f64,
    pub seed: String,
    pub difficulty: Difficulty,
    pub tuplets: bool,
    pub position: Option<Position>,
    pub offset_ms: f64,
    pub audio: bool,
}

impl StatusInfo {
    /// Format the position as "bar.beat", 1-based. Dashes before the downbeat.
    pub fn position_display(&self) -> String {
        match self.position {
            Some(p) => format!("{}.{}", p.bar + 1, p.beat + 1),
            None => "-.-".to_string(),
        }
    }

    pub fn difficulty_display(&self) -> String {
        if self.tuplets {
            format!("{}+tuplets", self.difficulty)
        } else {
            self.difficulty.to_string()
        }
    }

    pub fn offset_display(&self) -> String {
        format!("{:+.1}ms", self.offset_ms)
    }

    pub fn clock_display(&self) -> &str {
        if self.audio {
            "AUDIO"
        } else {
            "NO AUDIO"
        }
    }
}

impl Default for StatusInfo {
    fn default() -> Self {
        Self {
            bpm: 100.0,
            seed: String::new(),
            difficulty: Difficulty::Easy,
            tuplets: false,
            position: None,
            offset_ms: 0.0,
            audio: false,
        }
    }
}
