//! Child process capability.
//!
//! The pipeline only needs four things from a child: start it, poll it for
//! exit, ask it to stop (SIGTERM) and force it to stop (SIGKILL). `Launcher`
//! and `ChildProcess` capture exactly that, so tests can swap in fakes.
//!
//! `ProcessTable` holds the two handles that matter (modulator and current
//! transcoder) behind one mutex. The playback loop and the shutdown path both
//! go through it; neither holds the lock across an `.await`.

use crate::error::ProcessError;
use crate::source::Invocation;
use std::fmt;
use std::io;
use std::io::{PipeReader, PipeWriter};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

// ── Exit status ──────────────────────────────────────────────────────────────

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    /// Terminating signal, when killed by one (unix only).
    pub signal: Option<i32>,
}

impl ProcessExit {
    pub fn with_code(code: i32) -> Self {
        ProcessExit {
            code: Some(code),
            signal: None,
        }
    }

    pub fn with_signal(signal: i32) -> Self {
        ProcessExit {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        ProcessExit {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit status {code}"),
            (None, Some(sig)) => write!(f, "killed by signal {sig}"),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

// ── Capability traits ────────────────────────────────────────────────────────

/// A running child process.
pub trait ChildProcess: Send {
    /// OS process id, if the child has not been reaped yet.
    fn id(&self) -> Option<u32>;

    /// Non-blocking exit check.
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>>;

    /// Ask the process to stop (SIGTERM). Succeeds if it already exited.
    fn terminate(&mut self) -> io::Result<()>;

    /// Force the process to stop (SIGKILL). Succeeds if it already exited.
    fn kill(&mut self) -> io::Result<()>;
}

/// Standard streams for a new child. Stderr is always discarded.
#[derive(Debug)]
pub struct Wiring {
    pub stdin: Stdio,
    pub stdout: Stdio,
}

impl Wiring {
    pub fn new(stdin: Stdio, stdout: Stdio) -> Self {
        Wiring { stdin, stdout }
    }
}

/// Starts child processes.
pub trait Launcher: Send + Sync {
    fn launch(
        &self,
        invocation: &Invocation,
        wiring: Wiring,
    ) -> Result<Box<dyn ChildProcess>, ProcessError>;
}

// ── System implementation ────────────────────────────────────────────────────

/// Launcher backed by `tokio::process`. Must be used inside a tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn launch(
        &self,
        invocation: &Invocation,
        wiring: Wiring,
    ) -> Result<Box<dyn ChildProcess>, ProcessError> {
        let child = tokio::process::Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(wiring.stdin)
            .stdout(wiring.stdout)
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ProcessError::Spawn {
                program: invocation.program.clone(),
                source: e,
            })?;
        debug!("spawned {} (pid {:?})", invocation.program, child.id());
        Ok(Box::new(SystemChild { child }))
    }
}

struct SystemChild {
    child: tokio::process::Child,
}

impl ChildProcess for SystemChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(self.child.try_wait()?.map(ProcessExit::from))
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let pid = libc::pid_t::try_from(pid).map_err(io::Error::other)?;
        // SAFETY: plain syscall on a pid we spawned and have not reaped yet.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.kill()
    }

    fn kill(&mut self) -> io::Result<()> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            // Already exited and reaped.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e),
        }
    }
}

// ── Shared pipe ──────────────────────────────────────────────────────────────

/// The one pipe between transcoders and the modulator.
///
/// The read end goes to the modulator once. The write end stays here for the
/// program lifetime and each transcoder gets a duplicate, so the modulator
/// never sees end-of-file between tracks.
#[derive(Debug)]
pub struct SharedPipe {
    reader: Option<PipeReader>,
    writer: PipeWriter,
}

impl SharedPipe {
    pub fn new() -> Result<Self, ProcessError> {
        let (reader, writer) = std::io::pipe().map_err(ProcessError::Pipe)?;
        Ok(SharedPipe {
            reader: Some(reader),
            writer,
        })
    }

    /// The read end, available exactly once.
    pub fn take_reader(&mut self) -> Option<Stdio> {
        self.reader.take().map(Stdio::from)
    }

    /// A fresh duplicate of the write end for the next transcoder.
    pub fn writer(&self) -> Result<Stdio, ProcessError> {
        self.writer
            .try_clone()
            .map(Stdio::from)
            .map_err(ProcessError::Pipe)
    }
}

// ── Process table ────────────────────────────────────────────────────────────

/// Observed state of a slot in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Absent,
    Running,
    Exited(ProcessExit),
}

#[derive(Default)]
struct Slots {
    modulator: Option<Box<dyn ChildProcess>>,
    modulator_started: bool,
    transcoder: Option<Box<dyn ChildProcess>>,
}

/// The modulator and current transcoder handles, behind a single mutex.
#[derive(Clone, Default)]
pub struct ProcessTable {
    inner: Arc<Mutex<Slots>>,
}

impl fmt::Debug for ProcessTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.lock();
        f.debug_struct("ProcessTable")
            .field("modulator", &slots.modulator.as_ref().and_then(|c| c.id()))
            .field("modulator_started", &slots.modulator_started)
            .field("transcoder", &slots.transcoder.as_ref().and_then(|c| c.id()))
            .finish()
    }
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock must not keep shutdown from the handles.
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the modulator. Only one modulator per program lifetime.
    pub fn install_modulator(&self, child: Box<dyn ChildProcess>) -> Result<(), ProcessError> {
        let mut slots = self.lock();
        if slots.modulator_started {
            return Err(ProcessError::ModulatorAlreadyStarted);
        }
        slots.modulator = Some(child);
        slots.modulator_started = true;
        Ok(())
    }

    pub fn modulator_started(&self) -> bool {
        self.lock().modulator_started
    }

    /// Poll the modulator. The handle stays in place after it exits.
    pub fn poll_modulator(&self) -> Result<ChildState, ProcessError> {
        let mut slots = self.lock();
        poll_slot(&mut slots.modulator, false)
    }

    /// Record the transcoder for the current track.
    ///
    /// A child refused because another transcoder is still live is killed
    /// before returning.
    pub fn install_transcoder(&self, mut child: Box<dyn ChildProcess>) -> Result<(), ProcessError> {
        let mut slots = self.lock();
        let busy = match slots.transcoder.as_mut() {
            Some(current) => current.try_wait().map_err(ProcessError::Wait)?.is_none(),
            None => false,
        };
        if busy {
            drop(slots);
            if let Err(e) = child.kill() {
                warn!("failed to kill rejected transcoder: {e}");
            }
            return Err(ProcessError::TranscoderBusy);
        }
        slots.transcoder = Some(child);
        Ok(())
    }

    /// Poll the transcoder. An exited transcoder is removed from the table.
    pub fn poll_transcoder(&self) -> Result<ChildState, ProcessError> {
        let mut slots = self.lock();
        poll_slot(&mut slots.transcoder, true)
    }

    pub fn transcoder_live(&self) -> bool {
        matches!(self.poll_transcoder(), Ok(ChildState::Running))
    }

    /// Send SIGTERM to the modulator and drop its handle. `Ok(false)` when
    /// there was nothing to terminate.
    pub fn terminate_modulator(&self) -> Result<bool, ProcessError> {
        let taken = self.lock().modulator.take();
        match taken {
            Some(mut child) => {
                child.terminate().map_err(ProcessError::Signal)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Send SIGKILL to the current transcoder and drop its handle. `Ok(false)`
    /// when no transcoder is set.
    pub fn kill_transcoder(&self) -> Result<bool, ProcessError> {
        let taken = self.lock().transcoder.take();
        match taken {
            Some(mut child) => {
                child.kill().map_err(ProcessError::Signal)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn poll_slot(
    slot: &mut Option<Box<dyn ChildProcess>>,
    clear_on_exit: bool,
) -> Result<ChildState, ProcessError> {
    let Some(child) = slot.as_mut() else {
        return Ok(ChildState::Absent);
    };
    match child.try_wait().map_err(ProcessError::Wait)? {
        None => Ok(ChildState::Running),
        Some(exit) => {
            if clear_on_exit {
                *slot = None;
            }
            Ok(ChildState::Exited(exit))
        }
    }
}
