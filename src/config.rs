//! Settings — tempo, difficulty and calibration loaded from ~/.tempotap/config.yaml.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rhythm::Difficulty;
use crate::transport::{clamp_bpm, DEFAULT_COUNT_IN_BEATS};

/// Settings file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read or write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("could not encode settings: {0}")]
    Encode(#[from] serde_yaml::Error),
}

/// Directory holding the settings file and the log.
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tempotap")
}

/// Default settings path (~/.tempotap/config.yaml).
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.yaml")
}

/// Session settings. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bpm: f64,
    pub difficulty: Difficulty,
    pub tuplets: bool,
    /// Manual calibration baseline, positive when input arrives late.
    pub latency_offset_ms: f64,
    pub count_in_beats: u32,
    /// Metronome volume, 0.0 to 1.0.
    pub click_volume: f32,
    /// Play clicks through the audio device and use it as the clock.
    pub audio: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bpm: 100.0,
            difficulty: Difficulty::Easy,
            tuplets: false,
            latency_offset_ms: 0.0,
            count_in_beats: DEFAULT_COUNT_IN_BEATS,
            click_volume: 0.8,
            audio: true,
        }
    }
}

impl Settings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Self =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(settings.normalized())
    }

    /// Save settings to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml).map_err(io_err)
    }

    /// Clamp values into their supported ranges.
    pub fn normalized(mut self) -> Self {
        self.bpm = clamp_bpm(self.bpm);
        self.click_volume = if self.click_volume.is_nan() {
            0.0
        } else {
            self.click_volume.clamp(0.0, 1.0)
        };
        if !self.latency_offset_ms.is_finite() {
            self.latency_offset_ms = 0.0;
        }
        self
    }
}
