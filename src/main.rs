//! tempotap — tap along to an endless, seeded rhythm in the terminal.
//!
//! Loads settings, applies command-line overrides, opens the audio device as
//! clock and metronome (falling back to the system clock), and runs the TUI.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use tempotap::audio::AudioEngine;
use tempotap::config::{config_dir, default_config_path, Settings};
use tempotap::random::{generate_seed, DEFAULT_SEED_LEN};
use tempotap::rhythm::Difficulty;
use tempotap::session::{GameSession, SessionConfig};
use tempotap::transport::{Clock, SystemClock};
use tempotap::tui::App;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Seed for the rhythm stream. A fresh one is drawn when omitted.
    #[arg(long)]
    seed: Option<String>,

    /// Tempo in beats per minute (40-240)
    #[arg(long)]
    bpm: Option<f64>,

    /// easy, medium, hard, expert or 1-4
    #[arg(long)]
    difficulty: Option<Difficulty>,

    /// Include tuplet patterns
    #[arg(long)]
    tuplets: bool,

    /// Manual latency offset in milliseconds
    #[arg(long, allow_hyphen_values = true)]
    offset: Option<f64>,

    /// Use the system clock and play no clicks
    #[arg(long)]
    no_audio: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Settings file (default ~/.tempotap/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        if let Some(bpm) = self.bpm {
            settings.bpm = bpm;
        }
        if let Some(difficulty) = self.difficulty {
            settings.difficulty = difficulty;
        }
        if self.tuplets {
            settings.tuplets = true;
        }
        if let Some(offset) = self.offset {
            settings.latency_offset_ms = offset;
        }
        if self.no_audio {
            settings.audio = false;
        }
    }
}

fn init_logging(verbose: bool) {
    use simplelog::*;

    let log_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    let log_path = config_dir().join("tempotap.log");

    // Without a log file the game still runs; stdout belongs to the TUI.
    match open_log_file(&log_path) {
        Ok(log_file) => {
            if WriteLogger::init(log_level, Config::default(), log_file).is_ok() {
                log::info!("tempotap starting (log level: {:?})", log_level);
            }
        }
        Err(e) => eprintln!(
            "tempotap: logging disabled, cannot open {}: {e}",
            log_path.display()
        ),
    }
}

/// Create `path` and any missing parent directories.
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    File::create(path)
}

/// Open the audio device, or fall back to the system clock without clicks.
fn open_clock(settings: &Settings) -> (Box<dyn Clock>, Option<AudioEngine>) {
    if !settings.audio {
        return (Box::new(SystemClock::new()), None);
    }
    match AudioEngine::new() {
        Ok(mut engine) => {
            if let Err(e) = engine.set_volume(settings.click_volume) {
                log::warn!("could not set click volume: {e}");
            }
            (Box::new(engine.clock()), Some(engine))
        }
        Err(e) => {
            log::warn!("audio unavailable, using the system clock: {e}");
            (Box::new(SystemClock::new()), None)
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut settings = Settings::load(&config_path)?;
    args.apply(&mut settings);
    let settings = settings.normalized();

    let mut seed_rng = ChaCha8Rng::from_entropy();
    let seed = args
        .seed
        .clone()
        .unwrap_or_else(|| generate_seed(&mut seed_rng, DEFAULT_SEED_LEN));

    let (clock, engine) = open_clock(&settings);
    let audio = engine.is_some();
    let mut session = GameSession::new(clock, SessionConfig::from_settings(seed, &settings));
    if let Some(engine) = engine {
        session.set_click_sink(Box::new(engine));
    }

    let mut app = App::new(session, seed_rng, audio);

    enable_raw_mode()?;
    execute!(io::stdout(), EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
    terminal.clear()?;

    let result = app.run(&mut terminal);

    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result?;
    println!("seed: {}", app.session.seed());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_settings() {
        let args = Args::parse_from([
            "tempotap",
            "--bpm",
            "150",
            "--difficulty",
            "3",
            "--tuplets",
            "--offset",
            "-12.5",
            "--no-audio",
        ]);
        let mut settings = Settings::default();
        args.apply(&mut settings);
        assert_eq!(settings.bpm, 150.0);
        assert_eq!(settings.difficulty, Difficulty::Hard);
        assert!(settings.tuplets);
        assert_eq!(settings.latency_offset_ms, -12.5);
        assert!(!settings.audio);
    }

    #[test]
    fn no_flags_keep_settings() {
        let args = Args::parse_from(["tempotap"]);
        let mut settings = Settings {
            bpm: 88.0,
            tuplets: true,
            ..Settings::default()
        };
        args.apply(&mut settings);
        assert_eq!(settings.bpm, 88.0);
        assert!(settings.tuplets);
        assert!(settings.audio);
        assert!(args.seed.is_none());
    }

    #[test]
    fn log_file_creates_missing_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("tempotap.log");
        assert!(open_log_file(&path).is_ok());
        assert!(path.exists());
    }

    #[test]
    fn log_file_under_a_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        assert!(open_log_file(&blocker.join("tempotap.log")).is_err());
    }
}
