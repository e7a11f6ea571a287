//! Transport — the musical clock and lookahead beat scheduler.
//!
//! The transport owns the authoritative [`Clock`], turns a tempo into a
//! [`TimeMap`] when a run starts, and dispatches beat notifications. It is
//! driven cooperatively: the host calls [`Transport::tick`] every frame and
//! the transport does a bounded amount of work per call.
//!
//! Scheduling uses the classic lookahead split. Every
//! [`SCHEDULE_INTERVAL_SEC`] the scheduler queues every beat whose time falls
//! within [`LOOKAHEAD_SEC`] of now. Beat times always come from the time map
//! (`start + index * seconds_per_beat`), never from summed timer deltas, so a
//! late tick delays a notification but never shifts the grid.

pub mod clock;
pub mod time_map;

pub use clock::{Clock, ManualClock, SystemClock};
pub use time_map::{clamp_bpm, Position, TimeMap, BEATS_PER_BAR, MAX_BPM, MIN_BPM};

use std::collections::VecDeque;

use log::{debug, info, warn};
use thiserror::Error;

use crate::observer::{Observers, Subscription};

/// How often the scheduling loop looks ahead.
pub const SCHEDULE_INTERVAL_SEC: f64 = 0.025;

/// How far ahead of the clock beats are queued.
pub const LOOKAHEAD_SEC: f64 = 0.1;

/// Gap between `start()` and the first count-in beat.
pub const START_DELAY_SEC: f64 = 0.1;

/// One bar of count-in.
pub const DEFAULT_COUNT_IN_BEATS: u32 = 4;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The clock source could not be resumed (e.g. the audio device is gone).
    #[error("clock unavailable: {0}")]
    ClockUnavailable(String),
}

/// Lifecycle: `Idle -> CountIn -> Running -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    CountIn,
    Running,
}

/// A beat notification delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatEvent {
    /// Beat within its bar, `0..BEATS_PER_BAR`.
    pub beat_in_bar: u32,
    /// Bar index. Count-in bars and game bars are numbered separately from 0.
    pub bar_index: u64,
    pub is_count_in: bool,
    /// Scheduled clock time of the beat.
    pub time_sec: f64,
}

/// A metronome click handed to a [`ClickSink`] ahead of time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Click {
    pub time_sec: f64,
    /// Downbeat of a bar.
    pub accent: bool,
    pub count_in: bool,
}

/// Receiver for clicks queued by the scheduling loop (usually audio output).
pub trait ClickSink {
    /// Queue a click to sound at `click.time_sec` on the transport's clock.
    fn schedule_click(&mut self, click: Click);

    /// Drop every click not yet sounded.
    fn cancel_all(&mut self);
}

#[derive(Debug, Clone, Copy)]
struct ScheduledBeat {
    run_id: u64,
    event: BeatEvent,
}

/// The musical clock.
pub struct Transport {
    clock: Box<dyn Clock>,
    click_sink: Option<Box<dyn ClickSink>>,
    bpm: f64,
    count_in_beats: u32,
    state: TransportState,
    /// Bumped on every start and stop; deferred work from another run is dropped.
    run_id: u64,
    time_map: TimeMap,
    /// Next beat to schedule, counted from the first count-in beat.
    next_beat: u64,
    next_schedule_at: f64,
    pending: VecDeque<ScheduledBeat>,
    beat_observers: Observers<BeatEvent>,
}

impl Transport {
    /// Create an idle transport. `bpm` is clamped to the supported range.
    pub fn new(clock: Box<dyn Clock>, bpm: f64) -> Self {
        let bpm = clamp_bpm(bpm);
        Self {
            clock,
            click_sink: None,
            bpm,
            count_in_beats: DEFAULT_COUNT_IN_BEATS,
            state: TransportState::Idle,
            run_id: 0,
            time_map: TimeMap::new(0.0, bpm),
            next_beat: 0,
            next_schedule_at: 0.0,
            pending: VecDeque::new(),
            beat_observers: Observers::new(),
        }
    }

    /// Attach a sink that receives every scheduled beat as a click.
    pub fn set_click_sink(&mut self, sink: Box<dyn ClickSink>) {
        self.click_sink = Some(sink);
    }

    /// Set the tempo, clamped to the supported range, and return the applied value.
    ///
    /// The running run keeps the time map it started with; the new tempo is
    /// used from the next `start()`.
    pub fn set_tempo(&mut self, bpm: f64) -> f64 {
        self.bpm = clamp_bpm(bpm);
        if self.state != TransportState::Idle {
            debug!("tempo set to {} BPM, applies from the next run", self.bpm);
        }
        self.bpm
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Count-in length for the next run (0 disables the count-in).
    pub fn set_count_in_beats(&mut self, beats: u32) {
        self.count_in_beats = beats;
    }

    pub fn count_in_beats(&self) -> u32 {
        self.count_in_beats
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state != TransportState::Idle
    }

    /// Whether the current run has passed its count-in.
    pub fn count_in_complete(&self) -> bool {
        match self.state {
            TransportState::Idle => false,
            TransportState::Running => true,
            TransportState::CountIn => self.now() >= self.time_map.start_time_sec(),
        }
    }

    /// Identifier of the current (or last) run.
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Current authoritative clock time in seconds.
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// The time map of the current (or last) run.
    pub fn time_map(&self) -> TimeMap {
        self.time_map
    }

    /// Clock time of a musical position in the current run.
    pub fn position_to_time(&self, bar: u64, beat: u32, n: u32, d: u32) -> f64 {
        self.time_map.position_to_time(bar, beat, n, d)
    }

    /// Position of the playhead, or `None` when idle or still counting in.
    pub fn current_position(&self) -> Option<Position> {
        if self.state == TransportState::Idle {
            return None;
        }
        self.time_map.position_at(self.now())
    }

    /// Subscribe to beat notifications.
    pub fn subscribe_beats(&self, listener: impl FnMut(&BeatEvent) + 'static) -> Subscription {
        self.beat_observers.subscribe(listener)
    }

    /// Start a run. A no-op while already running.
    ///
    /// Fails, leaving the transport idle, when the clock cannot be resumed.
    pub fn start(&mut self) -> Result<(), TransportError> {
        if self.state != TransportState::Idle {
            return Ok(());
        }
        self.clock.resume()?;

        let now = self.clock.now();
        let anchor = now + START_DELAY_SEC;
        let seconds_per_beat = 60.0 / self.bpm;
        let start_time = anchor + self.count_in_beats as f64 * seconds_per_beat;

        self.run_id += 1;
        self.time_map = TimeMap::new(start_time, self.bpm);
        self.next_beat = 0;
        self.next_schedule_at = now;
        self.pending.clear();
        self.state = TransportState::CountIn;

        info!(
            "transport run {} started at {:.3}s: {} BPM, {} count-in beats, downbeat at {:.3}s",
            self.run_id, now, self.bpm, self.count_in_beats, start_time
        );

        self.tick();
        Ok(())
    }

    /// Stop the run and cancel everything still queued. Idempotent.
    pub fn stop(&mut self) {
        if self.state == TransportState::Idle {
            return;
        }
        self.run_id += 1;
        self.pending.clear();
        if let Some(sink) = self.click_sink.as_mut() {
            sink.cancel_all();
        }
        self.state = TransportState::Idle;
        info!("transport stopped at {:.3}s", self.clock.now());
    }

    /// One cooperative tick: run the scheduling loop if its interval has
    /// elapsed, then deliver every queued beat that is now due.
    ///
    /// Returns the number of beat notifications delivered.
    pub fn tick(&mut self) -> usize {
        if self.state == TransportState::Idle {
            return 0;
        }
        let now = self.clock.now();

        if now >= self.next_schedule_at {
            self.schedule_ahead(now);
            self.next_schedule_at = now + SCHEDULE_INTERVAL_SEC;
        }

        if self.state == TransportState::CountIn && now >= self.time_map.start_time_sec() {
            self.state = TransportState::Running;
            debug!("count-in complete at {:.3}s", now);
        }

        self.dispatch_due(now)
    }

    /// Clock time of beat `index` counted from the first count-in beat.
    fn beat_time(&self, index: u64) -> f64 {
        self.time_map
            .beats_to_time(index as f64 - self.count_in_beats as f64)
    }

    fn beat_event(&self, index: u64) -> BeatEvent {
        let count_in = self.count_in_beats as u64;
        let (is_count_in, local) = if index < count_in {
            (true, index)
        } else {
            (false, index - count_in)
        };
        BeatEvent {
            beat_in_bar: (local % BEATS_PER_BAR as u64) as u32,
            bar_index: local / BEATS_PER_BAR as u64,
            is_count_in,
            time_sec: self.beat_time(index),
        }
    }

    /// Queue every beat inside the lookahead window, in time order.
    fn schedule_ahead(&mut self, now: f64) {
        let horizon = now + LOOKAHEAD_SEC;
        while self.beat_time(self.next_beat) < horizon {
            let event = self.beat_event(self.next_beat);
            if let Some(sink) = self.click_sink.as_mut() {
                sink.schedule_click(Click {
                    time_sec: event.time_sec,
                    accent: event.beat_in_bar == 0,
                    count_in: event.is_count_in,
                });
            }
            self.pending.push_back(ScheduledBeat {
                run_id: self.run_id,
                event,
            });
            self.next_beat += 1;
        }
    }

    fn dispatch_due(&mut self, now: f64) -> usize {
        let mut delivered = 0;
        while let Some(front) = self.pending.front().copied() {
            if front.event.time_sec > now {
                break;
            }
            self.pending.pop_front();
            if front.run_id != self.run_id {
                warn!("dropping beat from stale run {}", front.run_id);
                continue;
            }
            self.beat_observers.emit(&front.event);
            delivered += 1;
        }
        delivered
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("bpm", &self.bpm)
            .field("state", &self.state)
            .field("run_id", &self.run_id)
            .field("time_map", &self.time_map)
            .field("pending", &self.pending.len())
            .finish()
    }
}
