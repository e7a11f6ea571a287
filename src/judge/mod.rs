//! Judgment engine — matches taps to onsets and decides when a run ends.
//!
//! The judge owns no clock and no rhythm. Every call borrows the session's
//! [`Transport`] for the time and its [`RhythmBuffer`] for the onsets, so
//! several sessions can be judged side by side without shared state.
//!
//! Input times are corrected by a latency offset made of a manual baseline
//! plus an automatic part learned by [`BiasCorrector`]:
//! `adjusted = now - offset_ms / 1000`. Timing errors are `adjusted - onset`,
//! so positive values are late.
//!
//! Matching is nearest-by-absolute-delta across every unresolved onset inside
//! the tolerance window, not strictly the earliest one.

pub mod calibration;
pub mod tolerance;

pub use calibration::{BiasCorrector, BIAS_GAIN, BIAS_THRESHOLD_MS, BIAS_WINDOW};
pub use tolerance::ToleranceWindow;

use log::{debug, info, warn};

use crate::observer::{Observers, Subscription};
use crate::rhythm::{OnsetId, RhythmBuffer};
use crate::transport::Transport;

/// Inputs closer together than this are one physical press.
pub const DEBOUNCE_SEC: f64 = 0.030;

/// Outcome of one judged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictKind {
    Hit,
    Miss,
    Extra,
}

/// A judgment delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub kind: VerdictKind,
    /// The onset the verdict is about. `None` for extra taps.
    pub onset: Option<OnsetId>,
    /// Signed error in milliseconds, positive when late. For extra taps this is
    /// measured against the nearest unresolved onset, or 0 if there is none.
    pub timing_error_ms: f64,
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameOverReason {
    Miss,
    Extra,
    /// The engine could not continue (e.g. bar generation failed mid-run).
    Aborted(String),
}

impl std::fmt::Display for GameOverReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GameOverReason::Miss => f.write_str("miss"),
            GameOverReason::Extra => f.write_str("extra"),
            GameOverReason::Aborted(why) => write!(f, "aborted: {why}"),
        }
    }
}

/// Per-run counters for the results view.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JudgeStats {
    pub hits: u32,
    total_abs_error_ms: f64,
}

impl JudgeStats {
    fn record_hit(&mut self, error_ms: f64) {
        self.hits += 1;
        self.total_abs_error_ms += error_ms.abs();
    }

    /// Mean absolute timing error over all hits, 0 before the first hit.
    pub fn mean_abs_error_ms(&self) -> f64 {
        if self.hits == 0 {
            0.0
        } else {
            self.total_abs_error_ms / self.hits as f64
        }
    }
}

/// How an onset left the unresolved set.
enum Resolution {
    Hit { onset: OnsetId, error_ms: f64 },
    Miss { onset: OnsetId, error_ms: f64 },
}

/// The judgment state machine.
pub struct Judge {
    active: bool,
    /// Transport run being judged.
    run_id: u64,
    manual_offset_ms: f64,
    bias: BiasCorrector,
    last_input_sec: Option<f64>,
    stats: JudgeStats,
    game_over: Option<GameOverReason>,
    verdict_observers: Observers<Verdict>,
    game_over_observers: Observers<GameOverReason>,
}

impl Judge {
    pub fn new(manual_offset_ms: f64) -> Self {
        Self {
            active: false,
            run_id: 0,
            manual_offset_ms,
            bias: BiasCorrector::new(),
            last_input_sec: None,
            stats: JudgeStats::default(),
            game_over: None,
            verdict_observers: Observers::new(),
            game_over_observers: Observers::new(),
        }
    }

    /// Begin judging the transport's current run.
    ///
    /// The learned offset carries over between runs; stats and the bias
    /// window start fresh.
    pub fn start(&mut self, transport: &Transport) {
        self.active = true;
        self.run_id = transport.run_id();
        self.last_input_sec = None;
        self.stats = JudgeStats::default();
        self.game_over = None;
        self.bias.clear_window();
        debug!("judge armed for run {}", self.run_id);
    }

    /// Stop judging and forget how the last run ended. Later inputs and
    /// polls are ignored. Idempotent.
    pub fn stop(&mut self) {
        self.active = false;
        self.game_over = None;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_manual_offset_ms(&mut self, offset_ms: f64) {
        self.manual_offset_ms = offset_ms;
    }

    pub fn manual_offset_ms(&self) -> f64 {
        self.manual_offset_ms
    }

    /// Manual baseline plus the learned correction.
    pub fn latency_offset_ms(&self) -> f64 {
        self.manual_offset_ms + self.bias.offset_ms()
    }

    pub fn bias(&self) -> &BiasCorrector {
        &self.bias
    }

    pub fn stats(&self) -> JudgeStats {
        self.stats
    }

    pub fn game_over_reason(&self) -> Option<&GameOverReason> {
        self.game_over.as_ref()
    }

    pub fn tolerance(&self, transport: &Transport) -> ToleranceWindow {
        ToleranceWindow::for_sixteenth(transport.time_map().sixteenth_sec())
    }

    /// Clock time corrected by the latency offset.
    pub fn adjusted_time(&self, now: f64) -> f64 {
        now - self.latency_offset_ms() / 1000.0
    }

    /// Onsets before this time can no longer be hit.
    pub fn settled_before(&self, transport: &Transport) -> f64 {
        self.adjusted_time(transport.now()) - self.tolerance(transport).late_sec
    }

    pub fn subscribe_verdicts(&self, listener: impl FnMut(&Verdict) + 'static) -> Subscription {
        self.verdict_observers.subscribe(listener)
    }

    pub fn subscribe_game_over(
        &self,
        listener: impl FnMut(&GameOverReason) + 'static,
    ) -> Subscription {
        self.game_over_observers.subscribe(listener)
    }

    fn judging(&self, transport: &Transport) -> bool {
        if !self.active {
            return false;
        }
        if transport.run_id() != self.run_id {
            warn!(
                "judge armed for run {} but transport is on run {}",
                self.run_id,
                transport.run_id()
            );
            return false;
        }
        transport.count_in_complete()
    }

    /// Judge one discrete input happening now.
    ///
    /// Taps during the count-in and duplicate taps inside the debounce window
    /// are dropped. An onset that expired before the tap is reported as a miss
    /// first, since that is what ended the run.
    pub fn on_hit(&mut self, transport: &Transport, buffer: &mut RhythmBuffer) -> Option<Verdict> {
        if !self.judging(transport) {
            return None;
        }
        let now = transport.now();
        if let Some(last) = self.last_input_sec {
            if now - last < DEBOUNCE_SEC {
                debug!("debounced input {:.1} ms after the last", (now - last) * 1000.0);
                return None;
            }
        }
        self.last_input_sec = Some(now);

        if let Some(miss) = self.poll(transport, buffer) {
            return Some(miss);
        }

        let input = self.adjusted_time(now);
        let window = self.tolerance(transport);

        let nearest = buffer
            .unhit_onsets()
            .into_iter()
            .map(|o| (o.id, input - o.time_sec))
            .filter(|&(_, delta)| window.contains(delta))
            .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()));

        if let Some((onset, delta)) = nearest {
            return Some(self.resolve(
                buffer,
                Resolution::Hit {
                    onset,
                    error_ms: delta * 1000.0,
                },
            ));
        }

        let next = buffer.next_unhit().map(|o| o.time_sec);
        let premature = next.is_some_and(|t| t > input);
        let within_stream = buffer.end_time_sec().is_some_and(|end| input <= end);
        if !premature && !within_stream {
            warn!("input at {input:.3}s is beyond the buffered stream, ignored");
            return None;
        }

        let verdict = Verdict {
            kind: VerdictKind::Extra,
            onset: None,
            timing_error_ms: next.map_or(0.0, |t| (input - t) * 1000.0),
        };
        self.verdict_observers.emit(&verdict);
        self.end_run(GameOverReason::Extra);
        Some(verdict)
    }

    /// Miss detection: expire the next unresolved onset once the adjusted
    /// clock is past its late bound. Call once per frame.
    pub fn poll(&mut self, transport: &Transport, buffer: &mut RhythmBuffer) -> Option<Verdict> {
        if !self.judging(transport) {
            return None;
        }
        let now = self.adjusted_time(transport.now());
        let late = self.tolerance(transport).late_sec;
        let next = buffer.next_unhit()?;
        if now <= next.time_sec + late {
            return None;
        }
        let resolution = Resolution::Miss {
            onset: next.id,
            error_ms: (now - next.time_sec) * 1000.0,
        };
        Some(self.resolve(buffer, resolution))
    }

    /// End the run without a verdict, e.g. when the engine cannot continue.
    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.active {
            self.end_run(GameOverReason::Aborted(reason.into()));
        }
    }

    /// Single exit from the unresolved set, shared by hit matching and miss
    /// polling.
    fn resolve(&mut self, buffer: &mut RhythmBuffer, resolution: Resolution) -> Verdict {
        match resolution {
            Resolution::Hit { onset, error_ms } => {
                buffer.mark_hit(onset);
                self.stats.record_hit(error_ms);
                self.bias.record(error_ms);
                let verdict = Verdict {
                    kind: VerdictKind::Hit,
                    onset: Some(onset),
                    timing_error_ms: error_ms,
                };
                debug!(
                    "hit bar {} slot {} at {error_ms:+.1} ms",
                    onset.bar_index, onset.slot
                );
                self.verdict_observers.emit(&verdict);
                verdict
            }
            Resolution::Miss { onset, error_ms } => {
                let verdict = Verdict {
                    kind: VerdictKind::Miss,
                    onset: Some(onset),
                    timing_error_ms: error_ms,
                };
                debug!("missed bar {} slot {}", onset.bar_index, onset.slot);
                self.verdict_observers.emit(&verdict);
                self.end_run(GameOverReason::Miss);
                verdict
            }
        }
    }

    fn end_run(&mut self, reason: GameOverReason) {
        self.active = false;
        info!(
            "game over ({reason}) after {} hits, mean error {:.1} ms",
            self.stats.hits,
            self.stats.mean_abs_error_ms()
        );
        self.game_over = Some(reason.clone());
        self.game_over_observers.emit(&reason);
    }
}

impl std::fmt::Debug for Judge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Judge")
            .field("active", &self.active)
            .field("run_id", &self.run_id)
            .field("offset_ms", &self.latency_offset_ms())
            .field("stats", &self.stats)
            .field("game_over", &self.game_over)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhythm::Difficulty;
    use crate::transport::ManualClock;
    use assert_approx_eq::assert_approx_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Rig {
        clock: ManualClock,
        transport: Transport,
        buffer: RhythmBuffer,
        judge: Judge,
    }

    fn rig(seed: &str) -> Rig {
        rig_with(seed, 120.0, Difficulty::Easy, false)
    }

    fn rig_with(seed: &str, bpm: f64, difficulty: Difficulty, tuplets: bool) -> Rig {
        let clock = ManualClock::starting_at(1.0);
        let mut transport = Transport::new(Box::new(clock.clone()), bpm);
        transport.start().unwrap();
        let mut buffer = RhythmBuffer::new(difficulty, tuplets);
        buffer.initialize(seed, transport.time_map()).unwrap();
        let mut judge = Judge::new(0.0);
        judge.start(&transport);
        Rig {
            clock,
            transport,
            buffer,
            judge,
        }
    }

    impl Rig {
        fn tap_at(&mut self, t: f64) -> Option<Verdict> {
            self.clock.set(t);
            self.judge.on_hit(&self.transport, &mut self.buffer)
        }

        fn first_onset(&self) -> (OnsetId, f64) {
            let o = self.buffer.next_unhit().unwrap();
            (o.id, o.time_sec)
        }
    }

    #[test]
    fn hit_ten_ms_late() {
        let mut r = rig("abc123");
        let (id, t) = r.first_onset();
        let v = r.tap_at(t + 0.010).unwrap();
        assert_eq!(v.kind, VerdictKind::Hit);
        assert_eq!(v.onset, Some(id));
        assert_approx_eq!(v.timing_error_ms, 10.0, 1e-6);
        assert!(r.buffer.onset(id).unwrap().is_hit());
        assert!(r.judge.is_active());
    }

    #[test]
    fn tap_with_no_note_nearby_is_extra() {
        let mut r = rig("abc123");
        let late = r.judge.tolerance(&r.transport).late_sec;
        let early = r.judge.tolerance(&r.transport).early_sec;
        // An onset with nothing else around half a second later.
        let times: Vec<f64> = r.buffer.unhit_onsets().iter().map(|o| o.time_sec).collect();
        let t = times
            .iter()
            .copied()
            .find(|&t| {
                let probe = t + 0.5;
                times
                    .iter()
                    .all(|&o| o <= t || o - early > probe + 0.001 && o > probe + late)
                    && r.buffer.end_time_sec().unwrap() >= probe
            })
            .expect("a gap after some onset");

        // Clear everything before and including `t` so only the gap matters.
        let before: Vec<OnsetId> = r
            .buffer
            .unhit_onsets()
            .iter()
            .filter(|o| o.time_sec <= t)
            .map(|o| o.id)
            .collect();
        for id in before {
            r.buffer.mark_hit(id);
        }

        let reasons = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&reasons);
        let _sub = r
            .judge
            .subscribe_game_over(move |why| sink.borrow_mut().push(why.clone()));

        let v = r.tap_at(t + 0.5).unwrap();
        assert_eq!(v.kind, VerdictKind::Extra);
        assert_eq!(v.onset, None);
        assert!(v.timing_error_ms < 0.0);
        assert_eq!(*reasons.borrow(), vec![GameOverReason::Extra]);
        assert!(!r.judge.is_active());
    }

    #[test]
    fn nearest_onset_wins_over_earliest() {
        // At 240 BPM quintuplet notes are 50 ms apart, closer than the window.
        let (mut r, (first, second)) = (0..200)
            .find_map(|i| {
                let r = rig_with(&format!("dense-{i}"), 240.0, Difficulty::Expert, true);
                let pair = r
                    .buffer
                    .unhit_onsets()
                    .windows(2)
                    .find(|w| w[1].time_sec - w[0].time_sec < 0.055)
                    .map(|w| ((w[0].id, w[0].time_sec), (w[1].id, w[1].time_sec)));
                pair.map(|p| (r, p))
            })
            .expect("a quintuplet in some buffer");

        let earlier: Vec<OnsetId> = r
            .buffer
            .unhit_onsets()
            .iter()
            .filter(|o| o.time_sec < first.1)
            .map(|o| o.id)
            .collect();
        for id in earlier {
            r.buffer.mark_hit(id);
        }

        let window = r.judge.tolerance(&r.transport);
        let tap = first.1 + 0.030;
        assert!(window.contains(tap - first.1));
        assert!(window.contains(tap - second.1));

        let v = r.tap_at(tap).unwrap();
        assert_eq!(v.kind, VerdictKind::Hit);
        assert_eq!(v.onset, Some(second.0));
        assert!(!r.buffer.onset(first.0).unwrap().is_hit());
    }

    #[test]
    fn taps_during_count_in_are_ignored() {
        let mut r = rig("count-in");
        let start = r.transport.time_map().start_time_sec();
        assert!(r.tap_at(start - 0.5).is_none());
        assert!(r.judge.is_active());
        assert_eq!(r.judge.stats().hits, 0);
    }

    #[test]
    fn double_fired_input_is_debounced() {
        let mut r = rig("debounce");
        let (_, t) = r.first_onset();
        assert_eq!(r.tap_at(t).unwrap().kind, VerdictKind::Hit);
        assert!(r.tap_at(t + 0.010).is_none());
        assert!(r.judge.is_active());
        assert_eq!(r.judge.stats().hits, 1);
    }

    #[test]
    fn silence_misses_exactly_once() {
        let mut r = rig("abc123");
        let verdicts = Rc::new(RefCell::new(Vec::new()));
        let reasons = Rc::new(RefCell::new(Vec::new()));
        let v_sink = Rc::clone(&verdicts);
        let r_sink = Rc::clone(&reasons);
        let _a = r.judge.subscribe_verdicts(move |v| v_sink.borrow_mut().push(*v));
        let _b = r
            .judge
            .subscribe_game_over(move |why| r_sink.borrow_mut().push(why.clone()));

        let (id, t) = r.first_onset();
        let late = r.judge.tolerance(&r.transport).late_sec;

        r.clock.set(t + late - 0.001);
        assert!(r.judge.poll(&r.transport, &mut r.buffer).is_none());

        r.clock.set(t + late + 0.001);
        let miss = r.judge.poll(&r.transport, &mut r.buffer).unwrap();
        assert_eq!(miss.kind, VerdictKind::Miss);
        assert_eq!(miss.onset, Some(id));

        for _ in 0..10 {
            r.clock.advance(0.1);
            assert!(r.judge.poll(&r.transport, &mut r.buffer).is_none());
        }
        assert_eq!(verdicts.borrow().len(), 1);
        assert_eq!(*reasons.borrow(), vec![GameOverReason::Miss]);
        assert_eq!(r.judge.game_over_reason(), Some(&GameOverReason::Miss));
    }

    #[test]
    fn tap_after_an_expired_onset_reports_the_miss() {
        let mut r = rig("late-tap");
        let (id, t) = r.first_onset();
        let v = r.tap_at(t + 0.2).unwrap();
        assert_eq!(v.kind, VerdictKind::Miss);
        assert_eq!(v.onset, Some(id));
    }

    #[test]
    fn hit_onsets_are_never_missed_or_rematched() {
        let mut r = rig("once");
        let (id, t) = r.first_onset();
        r.tap_at(t).unwrap();
        r.clock.set(t + 0.040);
        // The next onset is at least an eighth away on easy.
        assert_ne!(r.judge.poll(&r.transport, &mut r.buffer).and_then(|v| v.onset), Some(id));
        assert_ne!(r.buffer.next_unhit().map(|o| o.id), Some(id));
    }

    #[test]
    fn consistent_bias_moves_the_offset() {
        let mut r = rig("bias");
        let errors_ms = [20.0, 22.0, 18.0, 19.0, 21.0];
        for e in errors_ms {
            let (_, t) = r.first_onset();
            let v = r.tap_at(t + e / 1000.0).unwrap();
            assert_eq!(v.kind, VerdictKind::Hit);
            assert_approx_eq!(v.timing_error_ms, e, 1e-6);
        }
        assert_eq!(r.judge.bias().adjustments(), 1);
        assert_approx_eq!(r.judge.latency_offset_ms(), 20.0 * BIAS_GAIN, 1e-6);
        assert_eq!(r.judge.bias().pending(), 0);
    }

    #[test]
    fn manual_offset_shifts_the_input() {
        let mut r = rig("manual");
        r.judge.set_manual_offset_ms(30.0);
        let (_, t) = r.first_onset();
        // 30 ms of hardware latency: the tap arrives 30 ms late but judges on time.
        let v = r.tap_at(t + 0.030).unwrap();
        assert_approx_eq!(v.timing_error_ms, 0.0, 1e-6);
    }

    #[test]
    fn stale_run_is_not_judged() {
        let mut r = rig("stale");
        let (_, t) = r.first_onset();
        r.transport.stop();
        r.transport.start().unwrap();
        assert!(r.tap_at(t).is_none());
        r.clock.set(t + 1.0);
        assert!(r.judge.poll(&r.transport, &mut r.buffer).is_none());
    }

    #[test]
    fn stats_track_mean_absolute_error() {
        let mut r = rig("stats");
        for e in [10.0, -20.0] {
            let (_, t) = r.first_onset();
            r.tap_at(t + e / 1000.0).unwrap();
        }
        let stats = r.judge.stats();
        assert_eq!(stats.hits, 2);
        assert_approx_eq!(stats.mean_abs_error_ms(), 15.0, 1e-6);
    }

    #[test]
    fn abort_ends_the_run() {
        let mut r = rig("abort");
        r.judge.abort("bar generation failed");
        assert!(!r.judge.is_active());
        assert!(matches!(
            r.judge.game_over_reason(),
            Some(GameOverReason::Aborted(_))
        ));
    }

    #[test]
    fn stop_clears_the_game_over_reason() {
        let mut r = rig("cleared");
        let (_, t) = r.first_onset();
        r.clock.set(t + 1.0);
        r.judge.poll(&r.transport, &mut r.buffer).unwrap();
        assert_eq!(r.judge.game_over_reason(), Some(&GameOverReason::Miss));

        r.judge.stop();
        assert!(r.judge.game_over_reason().is_none());
        assert!(!r.judge.is_active());
    }

    #[test]
    fn tap_beyond_the_buffered_stream_is_ignored() {
        let mut r = rig("beyond");
        let ids: Vec<OnsetId> = r.buffer.unhit_onsets().iter().map(|o| o.id).collect();
        for id in ids {
            assert!(r.buffer.mark_hit(id));
        }
        let end = r.buffer.end_time_sec().unwrap();

        assert!(r.tap_at(end + 0.5).is_none());
        assert!(r.judge.is_active());
        assert!(r.judge.game_over_reason().is_none());
    }
}
