//! Shutdown: silence the transmitter, then stop the child processes.
//!
//! The transmitter pin is reset first so the carrier goes away even if
//! stopping the processes is slow or fails. Every step tolerates missing
//! state (no transcoder yet, modulator already gone) and the whole sequence
//! runs at most once.

use crate::error::HardwareError;
use crate::process::ProcessTable;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ── Transmitter hardware ─────────────────────────────────────────────────────

/// Puts the transmitter hardware into a quiescent state.
///
/// Must succeed when the hardware was never initialized and when called
/// repeatedly.
pub trait TransmitterReset: Send + Sync {
    fn reset(&self) -> Result<(), HardwareError>;
}

/// No transmitter hardware to reset.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransmitter;

impl TransmitterReset for NoTransmitter {
    fn reset(&self) -> Result<(), HardwareError> {
        Ok(())
    }
}

pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Releases the transmitter pin through the Linux sysfs GPIO interface:
/// drive it low as an output, hand it back as an input, unexport.
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    pin: u32,
    root: PathBuf,
}

impl SysfsGpio {
    pub fn new(pin: u32) -> Self {
        Self::with_root(pin, SYSFS_GPIO_ROOT)
    }

    pub fn with_root(pin: u32, root: impl Into<PathBuf>) -> Self {
        SysfsGpio {
            pin,
            root: root.into(),
        }
    }

    fn write(&self, file: &Path, value: &str) -> Result<(), HardwareError> {
        fs::write(file, value).map_err(|e| HardwareError::Io {
            pin: self.pin,
            file: file.to_path_buf(),
            source: e,
        })
    }
}

impl TransmitterReset for SysfsGpio {
    fn reset(&self) -> Result<(), HardwareError> {
        let pin = self.pin.to_string();
        let pin_dir = self.root.join(format!("gpio{pin}"));

        if !pin_dir.exists() {
            match self.write(&self.root.join("export"), &pin) {
                Ok(()) => {}
                // EBUSY: exported behind our back in the meantime.
                Err(HardwareError::Io { source, .. })
                    if source.kind() == io::ErrorKind::ResourceBusy => {}
                Err(e) => return Err(e),
            }
        }
        self.write(&pin_dir.join("direction"), "out")?;
        self.write(&pin_dir.join("value"), "0")?;
        self.write(&pin_dir.join("direction"), "in")?;
        self.write(&self.root.join("unexport"), &pin)?;
        debug!("gpio {} released", self.pin);
        Ok(())
    }
}

// ── Coordinator ──────────────────────────────────────────────────────────────

/// What a shutdown call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// An earlier call already ran the sequence; nothing was done.
    pub already_done: bool,
    pub hardware_reset: bool,
    pub modulator_terminated: bool,
    pub transcoder_killed: bool,
}

pub struct ShutdownCoordinator {
    processes: ProcessTable,
    transmitter: Arc<dyn TransmitterReset>,
    done: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(processes: ProcessTable, transmitter: Arc<dyn TransmitterReset>) -> Self {
        ShutdownCoordinator {
            processes,
            transmitter,
            done: AtomicBool::new(false),
        }
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Reset the transmitter, terminate the modulator, kill the transcoder.
    ///
    /// Best effort: failures are logged and the remaining steps still run.
    /// Only the first call does anything.
    pub fn shutdown(&self) -> ShutdownReport {
        if self.done.swap(true, Ordering::SeqCst) {
            debug!("shutdown already performed");
            return ShutdownReport {
                already_done: true,
                ..ShutdownReport::default()
            };
        }
        info!("Shutting down transmitter");

        let mut report = ShutdownReport::default();
        match self.transmitter.reset() {
            Ok(()) => report.hardware_reset = true,
            Err(e) => error!("Transmitter reset failed: {e}"),
        }
        match self.processes.terminate_modulator() {
            Ok(terminated) => report.modulator_terminated = terminated,
            Err(e) => warn!("Could not terminate modulator: {e}"),
        }
        match self.processes.kill_transcoder() {
            Ok(killed) => report.transcoder_killed = killed,
            Err(e) => warn!("Could not kill transcoder: {e}"),
        }
        debug!("shutdown report: {report:?}");
        report
    }
}

// ── Termination signal ───────────────────────────────────────────────────────

/// Wait for SIGTERM or SIGINT.
pub async fn termination_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}

/// Spawn the listener that turns a termination signal into cancellation.
///
/// The listener also stops waiting once `cancel` fires for another reason.
/// Must be called inside a tokio runtime.
pub fn listen_for_termination(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            res = termination_signal() => match res {
                Ok(()) => {
                    warn!("Termination signal received");
                    cancel.cancel();
                }
                Err(e) => error!("Cannot listen for termination signals: {e}"),
            },
            _ = cancel.cancelled() => {}
        }
    })
}
