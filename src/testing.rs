//! Fakes for exercising the pipeline without ffmpeg, pifm or GPIO hardware.
//!
//! `RecordingLauncher` records every invocation and hands back scripted
//! children; `CountingReset` counts transmitter resets.

use crate::config::Config;
use crate::error::{HardwareError, ProcessError};
use crate::process::{ChildProcess, Launcher, ProcessExit, Wiring};
use crate::shutdown::TransmitterReset;
use crate::source::Invocation;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Record {
    modulators: Vec<Invocation>,
    transcoders: Vec<Invocation>,
    terminated: usize,
    killed: usize,
}

/// Launcher that never starts a real process.
///
/// Invocations of the configured modulator program are modulators, anything
/// else is a transcoder. Clones share the same record.
#[derive(Clone)]
pub struct RecordingLauncher {
    record: Arc<Mutex<Record>>,
    modulator_program: String,
    failing: Vec<String>,
    unlaunchable: Vec<String>,
    hang_transcoders: bool,
    modulator_polls: Option<usize>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl Default for RecordingLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingLauncher {
    /// A launcher for the default config's program names.
    pub fn new() -> Self {
        Self::for_config(&Config::default())
    }

    pub fn for_config(config: &Config) -> Self {
        RecordingLauncher {
            record: Arc::default(),
            modulator_program: config.modulator.clone(),
            failing: Vec::new(),
            unlaunchable: Vec::new(),
            hang_transcoders: false,
            modulator_polls: None,
            cancel_after: None,
        }
    }

    /// Transcoders whose input contains `needle` exit with status 1.
    pub fn fail_input(mut self, needle: &str) -> Self {
        self.failing.push(needle.to_string());
        self
    }

    /// Launches whose program or input contains `needle` fail to spawn.
    pub fn unlaunchable(mut self, needle: &str) -> Self {
        self.unlaunchable.push(needle.to_string());
        self
    }

    /// Transcoders run until killed.
    pub fn hang_transcoders(mut self) -> Self {
        self.hang_transcoders = true;
        self
    }

    /// The modulator exits by itself after this many polls.
    pub fn modulator_exits_after(mut self, polls: usize) -> Self {
        self.modulator_polls = Some(polls);
        self
    }

    /// Cancel `token` when the `n`th transcoder is launched.
    pub fn cancel_after_transcoders(mut self, n: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((n, token));
        self
    }

    fn lock(&self) -> MutexGuard<'_, Record> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn modulator_launches(&self) -> usize {
        self.lock().modulators.len()
    }

    pub fn transcoder_launches(&self) -> usize {
        self.lock().transcoders.len()
    }

    pub fn modulator_invocations(&self) -> Vec<Invocation> {
        self.lock().modulators.clone()
    }

    /// The `-i` argument of every transcoder launch, in order.
    pub fn transcoder_inputs(&self) -> Vec<String> {
        self.lock().transcoders.iter().filter_map(input_of).collect()
    }

    pub fn terminated(&self) -> usize {
        self.lock().terminated
    }

    pub fn killed(&self) -> usize {
        self.lock().killed
    }
}

fn input_of(invocation: &Invocation) -> Option<String> {
    let pos = invocation.args.iter().position(|a| a == "-i")?;
    invocation
        .args
        .get(pos + 1)
        .map(|a| a.to_string_lossy().into_owned())
}

impl Launcher for RecordingLauncher {
    fn launch(
        &self,
        invocation: &Invocation,
        _wiring: Wiring,
    ) -> Result<Box<dyn ChildProcess>, ProcessError> {
        let input = input_of(invocation).unwrap_or_default();
        let matches = |needles: &[String]| {
            needles
                .iter()
                .any(|n| input.contains(n.as_str()) || invocation.program.contains(n.as_str()))
        };
        if matches(&self.unlaunchable) {
            return Err(ProcessError::Spawn {
                program: invocation.program.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "scripted spawn failure"),
            });
        }

        let is_modulator = invocation.program == self.modulator_program;
        let child = if is_modulator {
            self.lock().modulators.push(invocation.clone());
            FakeChild {
                polls_left: self.modulator_polls,
                exit: ProcessExit::with_code(1),
                record: Arc::clone(&self.record),
            }
        } else {
            let launched = {
                let mut record = self.lock();
                record.transcoders.push(invocation.clone());
                record.transcoders.len()
            };
            if let Some((n, token)) = &self.cancel_after {
                if launched >= *n {
                    token.cancel();
                }
            }
            let failing = self.failing.iter().any(|n| input.contains(n.as_str()));
            FakeChild {
                polls_left: if self.hang_transcoders { None } else { Some(0) },
                exit: ProcessExit::with_code(if failing { 1 } else { 0 }),
                record: Arc::clone(&self.record),
            }
        };
        Ok(Box::new(child))
    }
}

/// Exits after `polls_left` polls, or never (`None`) until signalled.
struct FakeChild {
    polls_left: Option<usize>,
    exit: ProcessExit,
    record: Arc<Mutex<Record>>,
}

impl FakeChild {
    fn record(&self) -> MutexGuard<'_, Record> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChildProcess for FakeChild {
    fn id(&self) -> Option<u32> {
        None
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        match self.polls_left {
            Some(0) => Ok(Some(self.exit)),
            Some(n) => {
                self.polls_left = Some(n - 1);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.record().terminated += 1;
        self.polls_left = Some(0);
        self.exit = ProcessExit::with_signal(15);
        Ok(())
    }

    fn kill(&mut self) -> io::Result<()> {
        self.record().killed += 1;
        self.polls_left = Some(0);
        self.exit = ProcessExit::with_signal(9);
        Ok(())
    }
}

/// Transmitter reset that only counts calls.
#[derive(Debug, Clone, Default)]
pub struct CountingReset {
    calls: Arc<AtomicUsize>,
}

impl CountingReset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TransmitterReset for CountingReset {
    fn reset(&self) -> Result<(), HardwareError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
