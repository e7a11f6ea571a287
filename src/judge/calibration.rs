//! Auto-calibration of input latency from consistent timing bias.

use std::collections::VecDeque;

use log::debug;

/// Hits averaged before a correction is considered.
pub const BIAS_WINDOW: usize = 5;
/// Mean error (ms) below which a bias is treated as noise.
pub const BIAS_THRESHOLD_MS: f64 = 8.0;
/// Fraction of the measured bias applied per correction.
pub const BIAS_GAIN: f64 = 0.5;

/// Rolling window of signed hit errors that nudges a latency offset.
///
/// Positive errors are late hits. A consistent late bias raises the offset,
/// which moves later input timestamps back toward the grid.
#[derive(Debug, Clone)]
pub struct BiasCorrector {
    window: VecDeque<f64>,
    capacity: usize,
    threshold_ms: f64,
    gain: f64,
    offset_ms: f64,
    adjustments: u32,
}

impl BiasCorrector {
    pub fn new() -> Self {
        Self::with_params(BIAS_WINDOW, BIAS_THRESHOLD_MS, BIAS_GAIN)
    }

    pub fn with_params(capacity: usize, threshold_ms: f64, gain: f64) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            threshold_ms,
            gain,
            offset_ms: 0.0,
            adjustments: 0,
        }
    }

    /// Feed the signed error of one hit.
    ///
    /// Returns the adjustment applied to the offset, if the window filled up
    /// with a bias above the threshold. The window is cleared whenever it fills.
    pub fn record(&mut self, error_ms: f64) -> Option<f64> {
        self.window.push_back(error_ms);
        if self.window.len() < self.capacity {
            return None;
        }

        let mean = self.window.iter().sum::<f64>() / self.window.len() as f64;
        self.window.clear();
        if mean.abs() <= self.threshold_ms {
            return None;
        }

        let adjustment = mean * self.gain;
        self.offset_ms += adjustment;
        self.adjustments += 1;
        debug!(
            "bias {mean:+.1} ms over {} hits, offset now {:+.1} ms",
            self.capacity, self.offset_ms
        );
        Some(adjustment)
    }

    /// Accumulated automatic offset in milliseconds.
    pub fn offset_ms(&self) -> f64 {
        self.offset_ms
    }

    pub fn adjustments(&self) -> u32 {
        self.adjustments
    }

    /// Samples collected toward the next evaluation.
    pub fn pending(&self) -> usize {
        self.window.len()
    }

    /// Drop collected samples but keep the learned offset.
    pub fn clear_window(&mut self) {
        self.window.clear();
    }
}

impl Default for BiasCorrector {
    fn default() -> Self {
        Self::new()
    }
}
