//! Metronome click voice — a short sine burst with an exponential decay.

use std::f32::consts::TAU;

/// Click length in seconds.
pub const CLICK_SEC: f32 = 0.03;

const ACCENT_HZ: f32 = 1760.0;
const NORMAL_HZ: f32 = 1320.0;
const ACCENT_GAIN: f32 = 0.9;
const NORMAL_GAIN: f32 = 0.6;

/// One sounding click. Lives on the audio thread.
#[derive(Debug, Clone, Copy)]
pub struct ClickVoice {
    phase_step: f32,
    gain: f32,
    decay: f32,
    frame: u32,
    length: u32,
}

impl ClickVoice {
    pub fn new(accent: bool, sample_rate: u32) -> Self {
        let sr = sample_rate.max(1) as f32;
        let (hz, gain) = if accent {
            (ACCENT_HZ, ACCENT_GAIN)
        } else {
            (NORMAL_HZ, NORMAL_GAIN)
        };
        let length = (CLICK_SEC * sr).round() as u32;
        Self {
            phase_step: TAU * hz / sr,
            gain,
            // Falls to ~1% of its peak by the end of the click.
            decay: (0.01f32).ln() / length.max(1) as f32,
            frame: 0,
            length,
        }
    }

    /// Next mono sample. Returns 0 once finished.
    pub fn next_sample(&mut self) -> f32 {
        if self.is_finished() {
            return 0.0;
        }
        let t = self.frame as f32;
        let sample = (self.phase_step * t).sin() * self.gain * (self.decay * t).exp();
        self.frame += 1;
        sample
    }

    pub fn is_finished(&self) -> bool {
        self.frame >= self.length
    }

    pub fn length_frames(&self) -> u32 {
        self.length
    }
}
