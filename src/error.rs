//! Error types for the playback daemon.
//!
//! Each concern gets its own enum. Recoverable failures (config, playlists,
//! individual transcoders) are handled close to where they happen and only
//! logged; the rest bubble up to the binary.

use std::io;
use std::path::PathBuf;

use crate::process::ProcessExit;

/// Errors while reading the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed config at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("invalid value '{value}' for key '{key}'")]
    InvalidValue { key: String, value: String },
}

/// Errors while reading a single playlist file.
#[derive(Debug, thiserror::Error)]
pub enum PlaylistError {
    #[error("cannot read playlist '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("not a playlist file: {0}")]
    UnknownDialect(PathBuf),
}

/// The music directory itself could not be walked.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("cannot read music directory '{path}': {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures of the process capability.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to poll child process: {0}")]
    Wait(#[source] io::Error),

    #[error("failed to signal child process: {0}")]
    Signal(#[source] io::Error),

    #[error("shared pipe error: {0}")]
    Pipe(#[source] io::Error),

    #[error("a transcoder is already running")]
    TranscoderBusy,

    #[error("the modulator has already been started once")]
    ModulatorAlreadyStarted,
}

/// Failures that stop the playback pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("modulator is not running; start it before playing tracks")]
    ModulatorNotRunning,

    #[error("modulator already started")]
    AlreadyStarted,

    #[error("failed to start modulator: {0}")]
    ModulatorSpawn(#[source] ProcessError),

    #[error("modulator exited unexpectedly ({0})")]
    ModulatorExited(ProcessExit),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Transmitter reset failures. Always logged, never escalated.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("gpio {pin}: cannot write '{file}': {source}")]
    Io {
        pin: u32,
        file: PathBuf,
        #[source]
        source: io::Error,
    },
}
