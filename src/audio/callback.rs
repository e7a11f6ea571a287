//! Audio callback — runs on the cpal audio thread.
//!
//! Drains commands from the ring buffer, starts each queued click on its exact
//! frame, mixes the sounding clicks, applies volume and a hard ceiling, and
//! advances the shared frame counter that [`super::AudioClock`] reads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::traits::Consumer;
use ringbuf::HeapCons;

use super::click::ClickVoice;
use super::command::AudioCommand;

/// Output is clamped to `[-CEILING, CEILING]`.
const CEILING: f32 = 0.95;

#[derive(Debug, Clone, Copy)]
struct QueuedClick {
    at_frame: u64,
    accent: bool,
}

/// State that lives on the audio thread. Accessed only from the cpal callback.
pub struct AudioCallback {
    consumer: HeapCons<AudioCommand>,
    /// Clicks waiting for their start frame, unordered.
    queued: Vec<QueuedClick>,
    voices: Vec<ClickVoice>,
    volume: f32,
    channels: u16,
    sample_rate: u32,
    /// Frames rendered since the stream started.
    frames: Arc<AtomicU64>,
}

impl AudioCallback {
    pub fn new(
        consumer: HeapCons<AudioCommand>,
        channels: u16,
        sample_rate: u32,
        frames: Arc<AtomicU64>,
    ) -> Self {
        Self {
            consumer,
            queued: Vec::with_capacity(64),
            voices: Vec::with_capacity(8),
            volume: 1.0,
            channels: channels.max(1),
            sample_rate,
            frames,
        }
    }

    /// Called by cpal for each block. `output` is interleaved.
    pub fn process(&mut self, output: &mut [f32]) {
        while let Some(cmd) = self.consumer.try_pop() {
            match cmd {
                AudioCommand::Click { at_frame, accent } => {
                    self.queued.push(QueuedClick { at_frame, accent });
                }
                AudioCommand::SetVolume(v) => {
                    self.volume = v.clamp(0.0, 1.0);
                }
                AudioCommand::Stop => {
                    self.queued.clear();
                    self.voices.clear();
                }
            }
        }

        let channels = self.channels as usize;
        let block_start = self.frames.load(Ordering::Acquire);
        let frame_count = output.len() / channels;

        for (i, frame) in output.chunks_mut(channels).enumerate() {
            let now = block_start + i as u64;
            self.start_due_clicks(now);

            let mut mixed = 0.0;
            for voice in &mut self.voices {
                mixed += voice.next_sample();
            }
            let sample = (mixed * self.volume).clamp(-CEILING, CEILING);
            frame.fill(sample);
        }
        self.voices.retain(|v| !v.is_finished());

        self.frames
            .store(block_start + frame_count as u64, Ordering::Release);
    }

    /// Start every queued click due at or before `frame`. Clicks whose frame has
    /// already passed start late rather than being dropped.
    fn start_due_clicks(&mut self, frame: u64) {
        let sample_rate = self.sample_rate;
        let voices = &mut self.voices;
        self.queued.retain(|click| {
            if click.at_frame <= frame {
                voices.push(ClickVoice::new(click.accent, sample_rate));
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::{
        traits::{Producer, Split},
        HeapRb,
    };

    fn setup() -> (
        ringbuf::HeapProd<AudioCommand>,
        AudioCallback,
        Arc<AtomicU64>,
    ) {
        let rb = HeapRb::<AudioCommand>::new(64);
        let (prod, cons) = rb.split();
        let frames = Arc::new(AtomicU64::new(0));
        let callback = AudioCallback::new(cons, 2, 48_000, Arc::clone(&frames));
        (prod, callback, frames)
    }

    fn first_nonzero_frame(output: &[f32], channels: usize) -> Option<usize> {
        output
            .chunks(channels)
            .position(|frame| frame.iter().any(|&s| s != 0.0))
    }

    #[test]
    fn silence_without_clicks() {
        let (_prod, mut callback, frames) = setup();
        let mut output = vec![999.0f32; 256];
        callback.process(&mut output);
        assert!(output.iter().all(|&s| s == 0.0));
        assert_eq!(frames.load(Ordering::Acquire), 128);
    }

    #[test]
    fn click_starts_on_its_frame() {
        let (mut prod, mut callback, _) = setup();
        prod.try_push(AudioCommand::Click {
            at_frame: 300,
            accent: true,
        })
        .unwrap();

        // Block 1 covers frames 0..256: nothing yet.
        let mut first = vec![0.0f32; 512];
        callback.process(&mut first);
        assert!(first.iter().all(|&s| s == 0.0));

        // Block 2 covers frames 256..512. Frame 300 itself is sin(0) = 0.
        let mut second = vec![0.0f32; 512];
        callback.process(&mut second);
        assert_eq!(first_nonzero_frame(&second, 2), Some(300 - 256 + 1));
    }

    #[test]
    fn channels_carry_the_same_sample() {
        let (mut prod, mut callback, _) = setup();
        prod.try_push(AudioCommand::Click {
            at_frame: 0,
            accent: false,
        })
        .unwrap();
        let mut output = vec![0.0f32; 64];
        callback.process(&mut output);
        for frame in output.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn stop_drops_queued_and_sounding_clicks() {
        let (mut prod, mut callback, _) = setup();
        prod.try_push(AudioCommand::Click {
            at_frame: 0,
            accent: true,
        })
        .unwrap();
        prod.try_push(AudioCommand::Click {
            at_frame: 400,
            accent: true,
        })
        .unwrap();

        let mut output = vec![0.0f32; 64];
        callback.process(&mut output);
        assert!(output.iter().any(|&s| s != 0.0));

        prod.try_push(AudioCommand::Stop).unwrap();
        let mut output = vec![999.0f32; 2048];
        callback.process(&mut output);
        assert!(output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn volume_scales_and_clamps() {
        let (mut prod, mut loud, _) = setup();
        prod.try_push(AudioCommand::Click {
            at_frame: 0,
            accent: true,
        })
        .unwrap();
        let mut full = vec![0.0f32; 128];
        loud.process(&mut full);

        let (mut prod, mut quiet, _) = setup();
        prod.try_push(AudioCommand::SetVolume(0.5)).unwrap();
        prod.try_push(AudioCommand::Click {
            at_frame: 0,
            accent: true,
        })
        .unwrap();
        let mut half = vec![0.0f32; 128];
        quiet.process(&mut half);

        for (f, h) in full.iter().zip(&half) {
            assert!((f * 0.5 - h).abs() < 1e-6);
        }
        assert!(full.iter().all(|s| s.abs() <= CEILING));
    }

    #[test]
    fn overlapping_clicks_never_exceed_the_ceiling() {
        let (mut prod, mut callback, _) = setup();
        for _ in 0..4 {
            prod.try_push(AudioCommand::Click {
                at_frame: 0,
                accent: true,
            })
            .unwrap();
        }
        let mut output = vec![0.0f32; 512];
        callback.process(&mut output);
        assert!(output.iter().all(|s| s.abs() <= CEILING));
        assert!(output.iter().any(|s| (s.abs() - CEILING).abs() < 1e-6));
    }

    #[test]
    fn late_click_starts_immediately() {
        let (mut prod, mut callback, frames) = setup();
        frames.store(1_000, Ordering::Release);
        prod.try_push(AudioCommand::Click {
            at_frame: 10,
            accent: false,
        })
        .unwrap();
        let mut output = vec![0.0f32; 64];
        callback.process(&mut output);
        assert_eq!(first_nonzero_frame(&output, 2), Some(1));
    }
}
