//! Command lines for the external processes.
//!
//! Pure functions: nothing here touches the file system or the network.

use crate::config::Config;
use crate::track::Track;
use std::ffi::OsString;
use std::fmt;

/// PCM sample rate shared by transcoder output and modulator input.
pub const SAMPLE_RATE: u32 = 44_100;

/// A program and its arguments, ready for the launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Invocation {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Transcoder command for one track: decode whatever the input is into raw
/// s16le PCM on stdout.
pub fn transcoder_invocation(track: &Track, config: &Config) -> Invocation {
    let base = Invocation::new(config.transcoder.as_str()).arg("-nostdin");
    let with_input = match track {
        Track::LocalFile { path } => base.arg("-i").arg(path.as_os_str()),
        Track::RemoteStream { url } => base
            .args(["-reconnect", "1", "-reconnect_streamed", "1"])
            .args(["-reconnect_delay_max", "5"])
            .arg("-i")
            .arg(url.as_str()),
    };
    with_input
        .args(["-vn", "-f", "s16le", "-acodec", "pcm_s16le"])
        .arg("-ar")
        .arg(SAMPLE_RATE.to_string())
        .arg("-ac")
        .arg(config.channels().to_string())
        .arg("-")
}

/// Modulator command: read PCM from stdin and broadcast it.
pub fn modulator_invocation(config: &Config) -> Invocation {
    Invocation::new(config.modulator.as_str())
        .arg("-")
        .arg(config.frequency.to_string())
        .arg(SAMPLE_RATE.to_string())
        .arg(if config.stereo { "stereo" } else { "mono" })
}
