//! Daemon configuration.
//!
//! Read once at startup from an INI-style file and passed around as an
//! immutable value. Every failure falls back to defaults: a radio that plays
//! with the wrong settings is better than one that does not start.

use crate::error::ConfigError;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

pub const DEFAULT_CONFIG_PATH: &str = "/pirateradio/pirateradio.conf";

/// The only section consulted in the config file.
const SECTION: &str = "pirateradio";

/// What to do when a transcoder fails to start or exits non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Log and move on to the next track.
    #[default]
    Skip,
    /// Log and end the current pass. A repeating run starts the next pass.
    AbortPass,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Skip => write!(f, "skip"),
            FailurePolicy::AbortPass => write!(f, "abort-pass"),
        }
    }
}

impl FailurePolicy {
    /// Parse a policy (case-insensitive, accepts hyphens or underscores).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "skip" => Some(FailurePolicy::Skip),
            "abort-pass" | "abort" => Some(FailurePolicy::AbortPass),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    /// Broadcast frequency in MHz.
    pub frequency: f64,
    pub shuffle: bool,
    pub repeat_all: bool,
    pub stereo: bool,
    pub music_dir: PathBuf,
    /// Transcoder program, looked up on `PATH` when not absolute.
    pub transcoder: String,
    /// Modulator program.
    pub modulator: String,
    /// BCM number of the transmitter GPIO pin, `None` when there is no
    /// transmitter hardware to reset.
    pub gpio_pin: Option<u32>,
    pub on_transcoder_failure: FailurePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            frequency: 87.9,
            shuffle: false,
            repeat_all: false,
            stereo: true,
            music_dir: PathBuf::from("/pirateradio"),
            transcoder: "ffmpeg".to_string(),
            modulator: "/root/pifm".to_string(),
            // Physical pin 7 on the Raspberry Pi header.
            gpio_pin: Some(4),
            on_transcoder_failure: FailurePolicy::Skip,
        }
    }
}

impl Config {
    /// Load the config file at `path`, or defaults if it cannot be used.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                let err = ConfigError::Io {
                    path: path.to_path_buf(),
                    source: e,
                };
                warn!("{err}; using defaults");
                return Config::default();
            }
        };
        match Config::from_ini_str(&text) {
            Ok(config) => config,
            Err(e) => {
                error!("Error reading from config file: {e}; using defaults");
                Config::default()
            }
        }
    }

    /// Parse INI text. A syntactically broken file is an error; a bad value for
    /// a single key only leaves that key at its default.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        for (key, value) in parse_section(text, SECTION)? {
            if let Err(e) = config.apply(&key, &value) {
                warn!("{e}; keeping default");
            }
        }
        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        match key {
            "frequency" => {
                let freq: f64 = value.parse().map_err(|_| invalid())?;
                if !freq.is_finite() || freq <= 0.0 {
                    return Err(invalid());
                }
                self.frequency = freq;
            }
            "shuffle" => self.shuffle = parse_bool(value).ok_or_else(invalid)?,
            "repeat_all" => self.repeat_all = parse_bool(value).ok_or_else(invalid)?,
            "stereo_playback" => self.stereo = parse_bool(value).ok_or_else(invalid)?,
            "music_dir" if !value.is_empty() => self.music_dir = PathBuf::from(value),
            "transcoder" if !value.is_empty() => self.transcoder = value.to_string(),
            "modulator" if !value.is_empty() => self.modulator = value.to_string(),
            "gpio_pin" => {
                self.gpio_pin = if value.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(value.parse().map_err(|_| invalid())?)
                };
            }
            "on_transcoder_failure" => {
                self.on_transcoder_failure =
                    FailurePolicy::from_str_loose(value).ok_or_else(invalid)?;
            }
            "music_dir" | "transcoder" | "modulator" => return Err(invalid()),
            _ => {}
        }
        Ok(())
    }

    /// Number of PCM channels implied by the stereo setting.
    pub fn channels(&self) -> u8 {
        if self.stereo { 2 } else { 1 }
    }
}

/// Booleans the way INI readers usually accept them.
fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// Collect the `key = value` pairs of one section, in file order.
fn parse_section(text: &str, wanted: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let mut pairs = Vec::new();
    let mut current: Option<String> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            let name = rest.strip_suffix(']').ok_or_else(|| ConfigError::Malformed {
                line: line_no,
                reason: "unterminated section header".to_string(),
            })?;
            current = Some(name.trim().to_string());
            continue;
        }

        let split = line.find(['=', ':']).ok_or_else(|| ConfigError::Malformed {
            line: line_no,
            reason: format!("expected 'key = value', got '{line}'"),
        })?;
        let key = line[..split].trim();
        if key.is_empty() {
            return Err(ConfigError::Malformed {
                line: line_no,
                reason: "empty key".to_string(),
            });
        }
        let Some(section) = current.as_deref() else {
            return Err(ConfigError::Malformed {
                line: line_no,
                reason: "key outside of any section".to_string(),
            });
        };
        if section == wanted {
            let value = line[split + 1..].trim();
            pairs.push((key.to_lowercase(), value.to_string()));
        }
    }
    Ok(pairs)
}
