//! Audio engine — metronome clicks on a cpal stream, and the clock it drives.
//!
//! The audio engine owns the cpal output stream and communicates with it via a
//! lock-free ring buffer. The main thread sends [`AudioCommand`]s to the audio
//! thread, which drains them in its callback and renders clicks on the exact
//! frame they were scheduled for.
//!
//! The frames rendered by the stream are also the time base: [`AudioClock`]
//! reads them, so clicks and judgment share one clock.

pub mod callback;
pub mod click;
pub mod command;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{info, warn};
use ringbuf::{
    traits::{Producer, Split},
    HeapRb,
};
use thiserror::Error;

pub use click::ClickVoice;
pub use command::AudioCommand;

use callback::AudioCallback;

use crate::transport::{Click, ClickSink, Clock, TransportError};

/// Ring buffer capacity (number of commands).
const RING_BUFFER_CAPACITY: usize = 1024;

/// Audio engine errors.
#[derive(Debug, Error)]
pub enum AudioError {
    /// No audio output device found.
    #[error("no audio output device found")]
    NoOutputDevice,
    /// Failed to query device configuration.
    #[error("device config error: {0}")]
    DeviceConfig(String),
    /// Failed to build the audio stream.
    #[error("stream build error: {0}")]
    StreamBuild(String),
    /// Failed to start the audio stream.
    #[error("stream play error: {0}")]
    StreamPlay(String),
    /// Ring buffer is full — audio thread is not draining fast enough.
    #[error("audio command ring buffer is full")]
    BufferFull,
}

/// Convert a clock time to the output frame it falls on.
pub fn time_to_frame(time_sec: f64, sample_rate: u32) -> u64 {
    (time_sec.max(0.0) * sample_rate as f64).round() as u64
}

/// Clock driven by the audio device: frames rendered divided by sample rate.
///
/// Advances in block-sized steps, like a browser audio context's
/// `currentTime`. Resuming fails once the stream has reported an error.
#[derive(Debug, Clone)]
pub struct AudioClock {
    frames: Arc<AtomicU64>,
    alive: Arc<AtomicBool>,
    sample_rate: u32,
}

impl AudioClock {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Clock for AudioClock {
    fn now(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn resume(&self) -> Result<(), TransportError> {
        if self.alive.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::ClockUnavailable(
                "audio stream stopped after an error".to_string(),
            ))
        }
    }
}

/// The audio engine. Owns the cpal stream and ring buffer producer.
///
/// Created on the main thread, sends commands to the audio thread via the
/// lock-free ring buffer.
pub struct AudioEngine {
    // Dropping the stream stops playback.
    _stream: cpal::Stream,
    producer: ringbuf::HeapProd<AudioCommand>,
    sample_rate: u32,
    channels: u16,
    frames: Arc<AtomicU64>,
    alive: Arc<AtomicBool>,
}

impl AudioEngine {
    /// Create and start the audio engine with the default output device.
    pub fn new() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::NoOutputDevice)?;

        let config = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceConfig(e.to_string()))?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels();

        Self::build_with_device(&device, sample_rate, channels)
    }

    /// Internal builder: sets up ring buffer, callback, and stream.
    fn build_with_device(
        device: &cpal::Device,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, AudioError> {
        let rb = HeapRb::<AudioCommand>::new(RING_BUFFER_CAPACITY);
        let (producer, consumer) = rb.split();

        let frames = Arc::new(AtomicU64::new(0));
        let alive = Arc::new(AtomicBool::new(true));
        let mut audio_callback =
            AudioCallback::new(consumer, channels, sample_rate, Arc::clone(&frames));

        let stream_config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream_alive = Arc::clone(&alive);
        let err_fn = move |err: cpal::StreamError| {
            warn!("audio stream error: {err}");
            stream_alive.store(false, Ordering::Release);
        };

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    audio_callback.process(data);
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamPlay(e.to_string()))?;

        info!("audio output running at {sample_rate} Hz, {channels} channel(s)");

        Ok(Self {
            _stream: stream,
            producer,
            sample_rate,
            channels,
            frames,
            alive,
        })
    }

    /// A clock reading this engine's rendered frames.
    pub fn clock(&self) -> AudioClock {
        AudioClock {
            frames: Arc::clone(&self.frames),
            alive: Arc::clone(&self.alive),
            sample_rate: self.sample_rate,
        }
    }

    /// Queue a click at an absolute clock time.
    pub fn click_at(&mut self, time_sec: f64, accent: bool) -> Result<(), AudioError> {
        self.producer
            .try_push(AudioCommand::Click {
                at_frame: time_to_frame(time_sec, self.sample_rate),
                accent,
            })
            .map_err(|_| AudioError::BufferFull)
    }

    /// Set master volume (clamped to 0.0..=1.0 on the audio thread).
    pub fn set_volume(&mut self, volume: f32) -> Result<(), AudioError> {
        self.producer
            .try_push(AudioCommand::SetVolume(volume))
            .map_err(|_| AudioError::BufferFull)
    }

    /// Drop every queued click and silence the sounding ones.
    pub fn stop(&mut self) -> Result<(), AudioError> {
        self.producer
            .try_push(AudioCommand::Stop)
            .map_err(|_| AudioError::BufferFull)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Whether the stream is still healthy.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

impl ClickSink for AudioEngine {
    fn schedule_click(&mut self, click: Click) {
        if let Err(e) = self.click_at(click.time_sec, click.accent) {
            warn!("click at {:.3}s dropped: {e}", click.time_sec);
        }
    }

    fn cancel_all(&mut self) {
        if let Err(e) = self.stop() {
            warn!("could not cancel clicks: {e}");
        }
    }
}
