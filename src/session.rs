//! Game session — one transport, one rhythm buffer and one judge per game.
//!
//! The host drives everything through [`GameSession::tick`], called once per
//! frame. A tick runs the transport's scheduling loop, then miss detection,
//! then slides the rhythm window past bars that can no longer be judged.

use std::cell::RefCell;
use std::rc::Rc;

use log::{error, info};
use thiserror::Error;

use crate::config::Settings;
use crate::judge::{GameOverReason, Judge, JudgeStats, Verdict};
use crate::observer::Subscription;
use crate::rhythm::{Difficulty, RhythmBuffer, RhythmError, RuntimeOnset};
use crate::transport::{
    BeatEvent, ClickSink, Clock, Position, TimeMap, Transport, TransportError, TransportState,
};

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Rhythm(#[from] RhythmError),
}

/// Coarse session state for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    CountIn,
    Playing,
    GameOver(GameOverReason),
}

/// Inputs fixed for one game.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub seed: String,
    pub bpm: f64,
    pub difficulty: Difficulty,
    pub tuplets: bool,
    pub latency_offset_ms: f64,
    pub count_in_beats: u32,
}

impl SessionConfig {
    pub fn from_settings(seed: impl Into<String>, settings: &Settings) -> Self {
        Self {
            seed: seed.into(),
            bpm: settings.bpm,
            difficulty: settings.difficulty,
            tuplets: settings.tuplets,
            latency_offset_ms: settings.latency_offset_ms,
            count_in_beats: settings.count_in_beats,
        }
    }
}

/// One playable game.
pub struct GameSession {
    config: SessionConfig,
    transport: Transport,
    buffer: RhythmBuffer,
    judge: Judge,
    /// Set by the judge's game-over listener, consumed on the next tick.
    ended: Rc<RefCell<bool>>,
    _game_over_sub: Subscription,
}

impl GameSession {
    pub fn new(clock: Box<dyn Clock>, config: SessionConfig) -> Self {
        let mut transport = Transport::new(clock, config.bpm);
        transport.set_count_in_beats(config.count_in_beats);
        let buffer = RhythmBuffer::new(config.difficulty, config.tuplets);
        let judge = Judge::new(config.latency_offset_ms);

        let ended = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&ended);
        let sub = judge.subscribe_game_over(move |_| *flag.borrow_mut() = true);

        Self {
            config,
            transport,
            buffer,
            judge,
            ended,
            _game_over_sub: sub,
        }
    }

    /// Route metronome clicks to `sink`.
    pub fn set_click_sink(&mut self, sink: Box<dyn ClickSink>) {
        self.transport.set_click_sink(sink);
    }

    /// Start a run with the configured seed.
    ///
    /// The transport starts first so the buffer can pin onsets to this run's
    /// time map. On failure everything is left idle.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.transport.is_running() {
            return Ok(());
        }
        self.transport.set_tempo(self.config.bpm);
        self.buffer
            .set_config(self.config.difficulty, self.config.tuplets);
        self.transport.start()?;
        if let Err(e) = self
            .buffer
            .initialize(&self.config.seed, self.transport.time_map())
        {
            self.transport.stop();
            return Err(e.into());
        }
        *self.ended.borrow_mut() = false;
        self.judge.start(&self.transport);
        info!(
            "session started: seed '{}', {} BPM, {}{}",
            self.config.seed,
            self.transport.bpm(),
            self.config.difficulty,
            if self.config.tuplets { ", tuplets" } else { "" }
        );
        Ok(())
    }

    /// Stop the run and start again with `seed`.
    pub fn restart(&mut self, seed: Option<String>) -> Result<(), SessionError> {
        self.stop();
        if let Some(seed) = seed {
            self.config.seed = seed;
        }
        self.start()
    }

    /// Tear down the run. Idempotent.
    pub fn stop(&mut self) {
        self.judge.stop();
        self.transport.stop();
    }

    /// Forward one input event to the judge.
    pub fn hit(&mut self) -> Option<Verdict> {
        let verdict = self.judge.on_hit(&self.transport, &mut self.buffer);
        self.settle();
        verdict
    }

    /// One cooperative tick. Returns the verdict produced by miss detection, if any.
    pub fn tick(&mut self) -> Option<Verdict> {
        self.transport.tick();
        let verdict = self.judge.poll(&self.transport, &mut self.buffer);
        if self.judge.is_active() {
            self.advance_window();
        }
        self.settle();
        verdict
    }

    /// Evict bars whose onsets are all past judgment.
    fn advance_window(&mut self) {
        let settled = self.judge.settled_before(&self.transport);
        let Some(bar) = self.transport.time_map().bar_at(settled) else {
            return;
        };
        if let Err(e) = self.buffer.advance_if_needed(bar) {
            error!("rhythm buffer failed mid-run: {e}");
            self.judge.abort(e.to_string());
        }
    }

    /// Stop scheduling once the judge has ended the run.
    fn settle(&mut self) {
        if std::mem::take(&mut *self.ended.borrow_mut()) {
            self.transport.stop();
        }
    }

    pub fn state(&self) -> SessionState {
        if let Some(reason) = self.judge.game_over_reason() {
            return SessionState::GameOver(reason.clone());
        }
        match self.transport.state() {
            TransportState::Idle => SessionState::Idle,
            TransportState::CountIn if !self.transport.count_in_complete() => {
                SessionState::CountIn
            }
            TransportState::CountIn | TransportState::Running => SessionState::Playing,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn seed(&self) -> &str {
        &self.config.seed
    }

    /// Tempo for the next start. Returns the clamped value.
    pub fn set_bpm(&mut self, bpm: f64) -> f64 {
        self.config.bpm = self.transport.set_tempo(bpm);
        self.config.bpm
    }

    /// Pattern pool for the next start. The running stream keeps its pool.
    pub fn set_difficulty(&mut self, difficulty: Difficulty, tuplets: bool) {
        self.config.difficulty = difficulty;
        self.config.tuplets = tuplets;
    }

    pub fn now(&self) -> f64 {
        self.transport.now()
    }

    pub fn position(&self) -> Option<Position> {
        self.transport.current_position()
    }

    pub fn time_map(&self) -> TimeMap {
        self.transport.time_map()
    }

    /// Unhit onsets in the window, chronological.
    pub fn upcoming_onsets(&self) -> Vec<&RuntimeOnset> {
        self.buffer.unhit_onsets()
    }

    /// Every onset in bar `bar_index`, if it is still buffered.
    pub fn bar_onsets(&self, bar_index: u64) -> Option<&[RuntimeOnset]> {
        self.buffer
            .bars()
            .find(|bar| bar.index == bar_index)
            .map(|bar| bar.onsets.as_slice())
    }

    pub fn latency_offset_ms(&self) -> f64 {
        self.judge.latency_offset_ms()
    }

    pub fn stats(&self) -> JudgeStats {
        self.judge.stats()
    }

    pub fn subscribe_beats(&self, listener: impl FnMut(&BeatEvent) + 'static) -> Subscription {
        self.transport.subscribe_beats(listener)
    }

    pub fn subscribe_verdicts(&self, listener: impl FnMut(&Verdict) + 'static) -> Subscription {
        self.judge.subscribe_verdicts(listener)
    }

    pub fn subscribe_game_over(
        &self,
        listener: impl FnMut(&GameOverReason) + 'static,
    ) -> Subscription {
        self.judge.subscribe_game_over(listener)
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn buffer(&self) -> &RhythmBuffer {
        &self.buffer
    }

    pub fn judge(&self) -> &Judge {
        &self.judge
    }
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("config", &self.config)
            .field("transport", &self.transport)
            .field("judge", &self.judge)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::VerdictKind;
    use crate::transport::ManualClock;

    fn session(seed: &str) -> (GameSession, ManualClock) {
        let clock = ManualClock::starting_at(0.5);
        let config = SessionConfig::from_settings(seed, &Settings::default());
        (GameSession::new(Box::new(clock.clone()), config), clock)
    }

    #[test]
    fn lifecycle_states() {
        let (mut s, clock) = session("states");
        assert_eq!(s.state(), SessionState::Idle);
        s.start().unwrap();
        assert_eq!(s.state(), SessionState::CountIn);
        clock.set(s.time_map().start_time_sec());
        s.tick();
        assert_eq!(s.state(), SessionState::Playing);
        s.stop();
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn failed_clock_leaves_session_idle() {
        let (mut s, clock) = session("offline");
        clock.set_available(false);
        assert!(matches!(
            s.start(),
            Err(SessionError::Transport(TransportError::ClockUnavailable(_)))
        ));
        assert_eq!(s.state(), SessionState::Idle);
        clock.set_available(true);
        assert!(s.start().is_ok());
    }

    #[test]
    fn failed_restart_after_game_over_is_idle() {
        let (mut s, clock) = session("retry");
        s.start().unwrap();
        let first = s.upcoming_onsets()[0].time_sec;
        clock.set(first + 0.2);
        s.tick();
        assert_eq!(s.state(), SessionState::GameOver(GameOverReason::Miss));

        clock.set_available(false);
        assert!(s.restart(None).is_err());
        assert_eq!(s.state(), SessionState::Idle);
        assert!(!s.judge().is_active());

        clock.set_available(true);
        s.restart(None).unwrap();
        assert_eq!(s.state(), SessionState::CountIn);
    }

    #[test]
    fn tempo_change_waits_for_the_next_run() {
        let (mut s, clock) = session("tempo");
        s.start().unwrap();
        let running = s.time_map();

        assert_eq!(s.set_bpm(150.0), 150.0);
        assert_eq!(s.time_map(), running);
        assert_eq!(s.time_map().bpm(), 100.0);

        clock.advance(1.0);
        s.restart(None).unwrap();
        assert_eq!(s.time_map().bpm(), 150.0);
        assert_eq!(s.set_bpm(1000.0), 240.0);
    }

    #[test]
    fn difficulty_change_waits_for_the_next_run() {
        let (mut s, _) = session("pool");
        s.start().unwrap();
        let before: Vec<_> = s.upcoming_onsets().iter().map(|o| o.onset).collect();

        s.set_difficulty(Difficulty::Expert, true);
        assert_eq!(s.buffer().config().difficulty, Difficulty::Easy);
        let still: Vec<_> = s.upcoming_onsets().iter().map(|o| o.onset).collect();
        assert_eq!(before, still);

        s.restart(None).unwrap();
        assert_eq!(s.buffer().config().difficulty, Difficulty::Expert);
        assert!(s.buffer().config().tuplets);

        let mut expected = RhythmBuffer::new(Difficulty::Expert, true);
        expected.initialize("pool", s.time_map()).unwrap();
        let replayed: Vec<_> = s.buffer().bars().map(|b| b.bar().onsets).collect();
        let fresh: Vec<_> = expected.bars().map(|b| b.bar().onsets).collect();
        assert_eq!(replayed, fresh);
    }

    #[test]
    fn game_over_stops_the_transport() {
        let (mut s, clock) = session("silence");
        s.start().unwrap();
        let first = s.upcoming_onsets()[0].time_sec;
        clock.set(first + 0.2);
        let v = s.tick().unwrap();
        assert_eq!(v.kind, VerdictKind::Miss);
        assert_eq!(s.state(), SessionState::GameOver(GameOverReason::Miss));
        assert_eq!(s.transport().state(), TransportState::Idle);
    }

    #[test]
    fn restart_with_same_seed_replays_the_pattern() {
        let (mut s, clock) = session("replay");
        s.start().unwrap();
        let first: Vec<_> = s.upcoming_onsets().iter().map(|o| o.onset).collect();
        clock.advance(3.0);
        s.restart(None).unwrap();
        let second: Vec<_> = s.upcoming_onsets().iter().map(|o| o.onset).collect();
        assert_eq!(first, second);

        s.restart(Some("other".to_string())).unwrap();
        assert_eq!(s.seed(), "other");
    }
}
