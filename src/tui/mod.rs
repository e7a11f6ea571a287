//! TUI interface — a thin ratatui host around one [`GameSession`].
//!
//! The App drives the session from its event loop: one `tick` per frame, one
//! `hit` per tap key. It only reads the session through its public views and
//! subscriptions.

pub mod keybindings;
pub mod status;

pub use keybindings::{map_key, Action};
pub use status::StatusInfo;

use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use crossterm::event::{self, Event as CrosstermEvent, KeyEventKind};
use log::warn;
use rand_chacha::ChaCha8Rng;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use ratatui::Frame;

use crate::judge::{Verdict, VerdictKind};
use crate::observer::Subscription;
use crate::random::{generate_seed, DEFAULT_SEED_LEN};
use crate::rhythm::RuntimeOnset;
use crate::session::{GameSession, SessionState};
use crate::transport::{BeatEvent, BEATS_PER_BAR};

/// Columns per beat in the bar view.
const CELLS_PER_BEAT: usize = 12;

/// The main TUI application state.
pub struct App {
    pub session: GameSession,
    pub status: StatusInfo,
    pub should_quit: bool,
    pub message: Option<String>,
    last_verdict: Rc<RefCell<Option<Verdict>>>,
    last_beat: Rc<RefCell<Option<BeatEvent>>>,
    seed_rng: ChaCha8Rng,
    _subscriptions: Vec<Subscription>,
}

impl App {
    /// Wrap a session. `seed_rng` draws seeds for [`Action::NewSeed`].
    pub fn new(session: GameSession, seed_rng: ChaCha8Rng, audio: bool) -> Self {
        let last_verdict = Rc::new(RefCell::new(None));
        let last_beat = Rc::new(RefCell::new(None));

        let verdict_sink = Rc::clone(&last_verdict);
        let beat_sink = Rc::clone(&last_beat);
        let subscriptions = vec![
            session.subscribe_verdicts(move |v| *verdict_sink.borrow_mut() = Some(*v)),
            session.subscribe_beats(move |b| *beat_sink.borrow_mut() = Some(*b)),
        ];

        let mut app = Self {
            session,
            status: StatusInfo {
                audio,
                ..StatusInfo::default()
            },
            should_quit: false,
            message: None,
            last_verdict,
            last_beat,
            seed_rng,
            _subscriptions: subscriptions,
        };
        app.refresh_status();
        app
    }

    /// Handle a mapped key action.
    pub fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => {
                self.session.stop();
                self.should_quit = true;
            }
            Action::Hit => {
                self.session.hit();
            }
            Action::Start => {
                if self.session.state() == SessionState::Idle {
                    self.start_run(None);
                }
            }
            Action::Restart => self.start_run(None),
            Action::NewSeed => {
                let seed = generate_seed(&mut self.seed_rng, DEFAULT_SEED_LEN);
                self.start_run(Some(seed));
            }
        }
        self.refresh_status();
    }

    fn start_run(&mut self, seed: Option<String>) {
        *self.last_verdict.borrow_mut() = None;
        *self.last_beat.borrow_mut() = None;
        self.message = match self.session.restart(seed) {
            Ok(()) => None,
            Err(e) => {
                warn!("could not start: {e}");
                Some(format!("could not start: {e}"))
            }
        };
    }

    /// Advance the session one frame.
    pub fn tick(&mut self) {
        self.session.tick();
        self.refresh_status();
    }

    fn refresh_status(&mut self) {
        let config = self.session.config();
        self.status.bpm = self.session.time_map().bpm();
        self.status.seed = config.seed.clone();
        self.status.difficulty = config.difficulty;
        self.status.tuplets = config.tuplets;
        self.status.position = self.session.position();
        self.status.offset_ms = self.session.latency_offset_ms();
    }

    pub fn last_verdict(&self) -> Option<Verdict> {
        *self.last_verdict.borrow()
    }

    /// Draw the UI.
    pub fn draw(&self, frame: &mut Frame) {
        let size = frame.area();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(5),    // Bar view
                Constraint::Length(3), // Verdict
                Constraint::Length(1), // Status bar
            ])
            .split(size);

        self.draw_header(frame, chunks[0]);
        self.draw_bar(frame, chunks[1]);
        self.draw_verdict(frame, chunks[2]);
        self.draw_status(frame, chunks[3]);

        if let SessionState::GameOver(_) = self.session.state() {
            self.draw_results(frame, size);
        }
    }

    fn draw_header(&self, frame: &mut Frame, area: Rect) {
        let state = match self.session.state() {
            SessionState::Idle => "Enter to start".to_string(),
            SessionState::CountIn => {
                let beat = self
                    .last_beat
                    .borrow()
                    .filter(|b| b.is_count_in)
                    .map_or(0, |b| b.beat_in_bar + 1);
                format!("count-in {beat}/{}", BEATS_PER_BAR)
            }
            SessionState::Playing => "tap along".to_string(),
            SessionState::GameOver(reason) => format!("game over: {reason}"),
        };
        let line = Line::from(vec![
            Span::styled(
                " tempotap ",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!(" seed {} | {} ", self.status.seed, state)),
        ]);
        let block = Block::default().borders(Borders::ALL);
        frame.render_widget(Paragraph::new(line).block(block), area);
    }

    fn draw_bar(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::ALL).title(" bar ");
        let bar_index = self.status.position.map_or(0, |p| p.bar);
        let onsets = self.session.bar_onsets(bar_index).unwrap_or(&[]);
        let playhead = self.status.position.map(|p| p.beat_in_bar());

        let lines = vec![
            Line::from(beat_ruler()),
            Line::from(onset_track(onsets)),
            Line::from(playhead_track(playhead)),
            Line::from(next_bar_preview(self.session.bar_onsets(bar_index + 1))),
        ];
        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn draw_verdict(&self, frame: &mut Frame, area: Rect) {
        let content = match (&self.message, self.last_verdict()) {
            (Some(message), _) => {
                Span::styled(message.clone(), Style::default().fg(Color::Red))
            }
            (None, Some(v)) => verdict_span(&v),
            (None, None) => Span::raw("-"),
        };
        let block = Block::default().borders(Borders::ALL).title(" last ");
        frame.render_widget(Paragraph::new(Line::from(content)).block(block), area);
    }

    fn draw_status(&self, frame: &mut Frame, area: Rect) {
        let line = Line::from(vec![
            Span::styled(
                format!(" {} ", self.status.clock_display()),
                Style::default()
                    .fg(if self.status.audio {
                        Color::Green
                    } else {
                        Color::Yellow
                    })
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!(
                " BPM:{:.0} | {} | {} | offset {} ",
                self.status.bpm,
                self.status.position_display(),
                self.status.difficulty_display(),
                self.status.offset_display(),
            )),
            Span::styled(
                " space/letters:tap  r:retry  n:new seed  q:quit ",
                Style::default().fg(Color::DarkGray),
            ),
        ]);
        frame.render_widget(
            Paragraph::new(line).style(Style::default().bg(Color::Black).fg(Color::White)),
            area,
        );
    }

    fn draw_results(&self, frame: &mut Frame, size: Rect) {
        let area = centered(size, 44, 9);
        let stats = self.session.stats();
        let reason = match self.session.state() {
            SessionState::GameOver(reason) => reason.to_string(),
            _ => String::new(),
        };
        let lines = vec![
            Line::from(Span::styled(
                format!("game over: {reason}"),
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            )),
            Line::from(format!("hits: {}", stats.hits)),
            Line::from(format!("mean error: {:.1} ms", stats.mean_abs_error_ms())),
            Line::from(format!("offset: {}", self.status.offset_display())),
            Line::from(format!("seed: {}", self.status.seed)),
            Line::from(""),
            Line::from("r: retry  n: new seed  q: quit"),
        ];
        let block = Block::default().borders(Borders::ALL).title(" results ");
        frame.render_widget(Clear, area);
        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    /// Run the TUI event loop.
    pub fn run(
        &mut self,
        terminal: &mut ratatui::Terminal<impl ratatui::backend::Backend>,
    ) -> io::Result<()> {
        while !self.should_quit {
            terminal
                .draw(|frame| self.draw(frame))
                .map_err(|e| io::Error::other(e.to_string()))?;

            // Short poll keeps tap timestamps close to the key press.
            if event::poll(Duration::from_millis(2))? {
                if let CrosstermEvent::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        if let Some(action) = map_key(key) {
                            self.handle_action(action);
                        }
                    }
                }
            }

            self.tick();
        }
        Ok(())
    }
}

fn bar_width() -> usize {
    CELLS_PER_BEAT * BEATS_PER_BAR as usize
}

fn column_of(beats_into_bar: f64) -> usize {
    let col = (beats_into_bar * CELLS_PER_BEAT as f64).round() as usize;
    col.min(bar_width() - 1)
}

fn beat_ruler() -> String {
    (0..BEATS_PER_BAR)
        .map(|b| format!("{:<width$}", b + 1, width = CELLS_PER_BEAT))
        .collect()
}

fn onset_track(onsets: &[RuntimeOnset]) -> String {
    let mut cells = vec!['·'; bar_width()];
    for onset in onsets {
        cells[column_of(onset.onset.normalized())] = if onset.is_hit() { '✓' } else { '●' };
    }
    cells.into_iter().collect()
}

fn playhead_track(beats_into_bar: Option<f64>) -> String {
    let mut cells = vec![' '; bar_width()];
    if let Some(beats) = beats_into_bar {
        cells[column_of(beats)] = '^';
    }
    cells.into_iter().collect()
}

fn next_bar_preview(onsets: Option<&[RuntimeOnset]>) -> String {
    match onsets {
        Some(onsets) => format!("next: {}", onset_track(onsets)),
        None => String::new(),
    }
}

fn verdict_span(v: &Verdict) -> Span<'static> {
    match v.kind {
        VerdictKind::Hit => Span::styled(
            format!("HIT {:+.0} ms", v.timing_error_ms),
            Style::default().fg(Color::Green),
        ),
        VerdictKind::Miss => Span::styled("MISS", Style::default().fg(Color::Red)),
        VerdictKind::Extra => Span::styled(
            format!("EXTRA ({:+.0} ms)", v.timing_error_ms),
            Style::default().fg(Color::Red),
        ),
    }
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}
