//! Commands sent from the main thread to the audio thread via ring buffer.

/// Commands sent from the main thread to the audio thread via ring buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioCommand {
    /// Sound a metronome click starting at an absolute output frame.
    Click { at_frame: u64, accent: bool },

    /// Set master volume (0.0 to 1.0).
    SetVolume(f32),

    /// Drop queued clicks and silence the ones sounding.
    Stop,
}
