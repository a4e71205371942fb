//! Playback pipeline.
//!
//! One modulator process is started for the program lifetime, reading raw
//! PCM from the shared pipe. Tracks are then played one at a time: a
//! transcoder is spawned with its stdout on the pipe and awaited before the
//! next one starts. The pipe buffer is the only buffering; a transcoder
//! cannot run further ahead of the modulator than that.
//!
//! The run loop observes a `CancellationToken` between tracks and while
//! waiting on a transcoder. It never kills anything itself: that is the
//! shutdown coordinator's job, through the shared `ProcessTable`.

use crate::config::{Config, FailurePolicy};
use crate::error::{PipelineError, ProcessError};
use crate::process::{ChildState, Launcher, ProcessExit, ProcessTable, SharedPipe, Wiring};
use crate::source::{modulator_invocation, transcoder_invocation};
use crate::track::{Track, TrackList};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How often a running transcoder (and the modulator) is polled for exit.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pause before repeating a pass in which nothing played.
const EMPTY_PASS_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    ModulatorStarting,
    ModulatorRunning,
    TranscoderStarting,
    TranscoderRunning,
    TranscoderExited,
    Stopped,
}

/// Result of playing a single track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    Finished,
    /// Transcoder exited non-zero or was killed.
    Failed(ProcessExit),
    /// Transcoder could not be started.
    SpawnFailed(String),
    Cancelled,
}

impl TrackOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TrackOutcome::Failed(_) | TrackOutcome::SpawnFailed(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub played: usize,
    pub failed: usize,
    /// Ended early by `FailurePolicy::AbortPass`.
    pub aborted: bool,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Single pass completed (no repeat).
    Finished,
    Cancelled,
    NothingToPlay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub passes: u64,
    pub played: u64,
    pub failed: u64,
    pub stopped: StopReason,
}

pub struct PipelineOrchestrator {
    config: Arc<Config>,
    launcher: Arc<dyn Launcher>,
    processes: ProcessTable,
    pipe: SharedPipe,
    rng: fastrand::Rng,
    state: PipelineState,
    poll_interval: Duration,
}

impl PipelineOrchestrator {
    pub fn new(config: Arc<Config>, launcher: Arc<dyn Launcher>) -> Result<Self, PipelineError> {
        Ok(PipelineOrchestrator {
            config,
            launcher,
            processes: ProcessTable::new(),
            pipe: SharedPipe::new()?,
            rng: fastrand::Rng::new(),
            state: PipelineState::Idle,
            poll_interval: POLL_INTERVAL,
        })
    }

    /// Use a seeded RNG so shuffled passes are reproducible.
    pub fn with_rng(mut self, rng: fastrand::Rng) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Handle on the process table, for the shutdown coordinator.
    pub fn processes(&self) -> ProcessTable {
        self.processes.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Start the modulator on the read end of the shared pipe. Once only.
    pub fn start_modulator(&mut self) -> Result<(), PipelineError> {
        if self.processes.modulator_started() {
            return Err(PipelineError::AlreadyStarted);
        }
        let stdin = self.pipe.take_reader().ok_or(PipelineError::AlreadyStarted)?;
        self.state = PipelineState::ModulatorStarting;

        let invocation = modulator_invocation(&self.config);
        info!("Starting modulator: {invocation}");
        let child = match self
            .launcher
            .launch(&invocation, Wiring::new(stdin, Stdio::null()))
        {
            Ok(child) => child,
            Err(e) => {
                self.state = PipelineState::Stopped;
                return Err(PipelineError::ModulatorSpawn(e));
            }
        };
        self.processes.install_modulator(child)?;
        self.state = PipelineState::ModulatorRunning;
        Ok(())
    }

    /// Play one track to completion.
    ///
    /// Fails with `ModulatorNotRunning` (spawning nothing) if the modulator
    /// was never started, and with `ModulatorExited` if it has died. A
    /// failing transcoder is an outcome, not an error.
    pub async fn play_track(
        &mut self,
        track: &Track,
        cancel: &CancellationToken,
    ) -> Result<TrackOutcome, PipelineError> {
        if !self.processes.modulator_started() {
            return Err(PipelineError::ModulatorNotRunning);
        }
        match self.processes.poll_modulator()? {
            ChildState::Running => {}
            ChildState::Exited(exit) => {
                self.state = PipelineState::Stopped;
                return Err(PipelineError::ModulatorExited(exit));
            }
            // Taken by the shutdown path.
            ChildState::Absent => return Ok(TrackOutcome::Cancelled),
        }
        if cancel.is_cancelled() {
            return Ok(TrackOutcome::Cancelled);
        }
        // An interrupted track leaves its transcoder for the shutdown path.
        if self.processes.transcoder_live() {
            return Err(ProcessError::TranscoderBusy.into());
        }

        self.state = PipelineState::TranscoderStarting;
        let invocation = transcoder_invocation(track, &self.config);
        let stdout = self.pipe.writer()?;
        info!("Playing {track}");
        debug!("transcoder: {invocation}");

        let child = match self
            .launcher
            .launch(&invocation, Wiring::new(Stdio::null(), stdout))
        {
            Ok(child) => child,
            Err(e) => {
                warn!("Transcoder failed to start for {track}: {e}");
                self.state = PipelineState::ModulatorRunning;
                return Ok(TrackOutcome::SpawnFailed(e.to_string()));
            }
        };
        self.processes.install_transcoder(child)?;
        self.state = PipelineState::TranscoderRunning;

        let outcome = self.wait_for_transcoder(cancel).await?;
        match &outcome {
            TrackOutcome::Failed(exit) => warn!("Transcoder for {track} failed: {exit}"),
            TrackOutcome::Cancelled => debug!("playback of {track} interrupted"),
            _ => {}
        }
        if outcome != TrackOutcome::Cancelled {
            self.state = PipelineState::ModulatorRunning;
        }
        Ok(outcome)
    }

    async fn wait_for_transcoder(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<TrackOutcome, PipelineError> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(TrackOutcome::Cancelled),
                _ = ticker.tick() => {}
            }

            match self.processes.poll_transcoder()? {
                ChildState::Running => {}
                ChildState::Exited(exit) => {
                    self.state = PipelineState::TranscoderExited;
                    return Ok(if exit.success() {
                        TrackOutcome::Finished
                    } else {
                        TrackOutcome::Failed(exit)
                    });
                }
                ChildState::Absent => return Ok(TrackOutcome::Cancelled),
            }

            match self.processes.poll_modulator()? {
                ChildState::Running => {}
                ChildState::Exited(exit) => {
                    self.state = PipelineState::Stopped;
                    return Err(PipelineError::ModulatorExited(exit));
                }
                ChildState::Absent => return Ok(TrackOutcome::Cancelled),
            }
        }
    }

    /// Play every track once, shuffled first if configured.
    pub async fn run_pass(
        &mut self,
        tracks: &TrackList,
        cancel: &CancellationToken,
    ) -> Result<PassSummary, PipelineError> {
        let order = if self.config.shuffle {
            tracks.shuffled(&mut self.rng)
        } else {
            tracks.as_slice().to_vec()
        };

        let mut summary = PassSummary::default();
        for track in &order {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let outcome = self.play_track(track, cancel).await?;
            if outcome == TrackOutcome::Cancelled {
                summary.cancelled = true;
                break;
            }
            if !outcome.is_failure() {
                summary.played += 1;
                continue;
            }
            summary.failed += 1;
            if self.config.on_transcoder_failure == FailurePolicy::AbortPass {
                warn!("Aborting pass after transcoder failure");
                summary.aborted = true;
                break;
            }
        }
        Ok(summary)
    }

    /// Start the modulator if needed, then play passes until done: one pass,
    /// or forever with `repeat_all` until cancelled.
    pub async fn run(
        &mut self,
        tracks: &TrackList,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        let result = self.run_passes(tracks, cancel).await;
        self.state = PipelineState::Stopped;
        result
    }

    async fn run_passes(
        &mut self,
        tracks: &TrackList,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary {
            passes: 0,
            played: 0,
            failed: 0,
            stopped: StopReason::Finished,
        };
        if tracks.is_empty() {
            warn!("Nothing to play");
            summary.stopped = StopReason::NothingToPlay;
            return Ok(summary);
        }
        if cancel.is_cancelled() {
            summary.stopped = StopReason::Cancelled;
            return Ok(summary);
        }
        if !self.processes.modulator_started() {
            self.start_modulator()?;
        }

        loop {
            let pass = self.run_pass(tracks, cancel).await?;
            summary.passes += 1;
            summary.played += pass.played as u64;
            summary.failed += pass.failed as u64;
            debug!("pass {} done: {:?}", summary.passes, pass);

            if pass.cancelled || cancel.is_cancelled() {
                summary.stopped = StopReason::Cancelled;
                break;
            }
            if !self.config.repeat_all {
                break;
            }
            if pass.played == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        summary.stopped = StopReason::Cancelled;
                        break;
                    }
                    _ = tokio::time::sleep(EMPTY_PASS_BACKOFF) => {}
                }
            }
        }
        Ok(summary)
    }
}
