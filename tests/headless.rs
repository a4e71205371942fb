//! Headless integration tests for pirate_radio.
//!
//! These tests drive the scanner, pipeline and shutdown path end-to-end
//! without ffmpeg, pifm or GPIO hardware, using the recording fakes.

use pirate_radio::config::Config;
use pirate_radio::error::PipelineError;
use pirate_radio::library;
use pirate_radio::pipeline::{PipelineOrchestrator, PipelineState, StopReason};
use pirate_radio::shutdown::ShutdownCoordinator;
use pirate_radio::testing::{CountingReset, RecordingLauncher};
use pirate_radio::track::{Track, TrackList};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn library_with(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
    dir
}

fn orchestrator(config: Config, launcher: &RecordingLauncher) -> PipelineOrchestrator {
    PipelineOrchestrator::new(Arc::new(config), Arc::new(launcher.clone()))
        .unwrap()
        .with_poll_interval(Duration::from_millis(1))
}

fn local_names(root: &Path, tracks: &TrackList) -> Vec<String> {
    tracks
        .iter()
        .map(|t| match t.local_path() {
            Some(p) => p.strip_prefix(root).unwrap().display().to_string(),
            None => t.to_string(),
        })
        .collect()
}

// ── Library scanning ──────────────────────────────────────────────────────

#[test]
fn scenario_a_sorted_tree_order() {
    let dir = library_with(&[("sub/c.wav", ""), ("b.mp3", ""), ("a.mp3", "")]);
    let tracks = library::scan(dir.path()).unwrap();
    assert_eq!(local_names(dir.path(), &tracks), ["a.mp3", "b.mp3", "sub/c.wav"]);
}

#[test]
fn scenario_b_m3u_expansion() {
    let dir = library_with(&[
        ("song1.mp3", ""),
        ("list.m3u", "# comment\nsong1.mp3\nhttp://example.com/stream\n"),
    ]);
    let tracks = library::scan(dir.path()).unwrap();
    // list.m3u sorts before song1.mp3, so the expansion comes first.
    assert_eq!(
        tracks.as_slice(),
        [
            Track::local(dir.path().join("song1.mp3")),
            Track::remote("http://example.com/stream"),
            Track::local(dir.path().join("song1.mp3")),
        ]
    );
}

#[test]
fn scenario_c_pls_expansion() {
    let dir = library_with(&[
        ("stations/song1.mp3", ""),
        (
            "stations/radio.pls",
            "[playlist]\nFile1=song1.mp3\nFile2=http://example.com/stream\nTitle1=Song One\n",
        ),
    ]);
    let tracks = library::scan(dir.path()).unwrap();
    assert_eq!(
        local_names(dir.path(), &tracks),
        [
            "stations/song1.mp3",
            "http://example.com/stream",
            "stations/song1.mp3"
        ]
    );
}

#[test]
fn repeated_scans_are_identical() {
    let dir = library_with(&[
        ("rock/b.flac", ""),
        ("rock/a.ogg", ""),
        ("jazz/x.m4a", ""),
        ("jazz/live.pls", "File1=https://jazz.example/live\n"),
        ("intro.aac", ""),
    ]);
    assert_eq!(
        library::scan(dir.path()).unwrap(),
        library::scan(dir.path()).unwrap()
    );
}

// ── Pipeline ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_d_repeat_replays_same_order() {
    let cancel = CancellationToken::new();
    let launcher = RecordingLauncher::new().cancel_after_transcoders(6, cancel.clone());
    let config = Config {
        repeat_all: true,
        shuffle: false,
        ..Config::default()
    };
    let mut orch = orchestrator(config, &launcher);
    let tracks: TrackList = vec![
        Track::local("/music/1.mp3"),
        Track::local("/music/2.mp3"),
        Track::remote("http://example.com/3"),
    ]
    .into();

    let summary = orch.run(&tracks, &cancel).await.unwrap();
    assert_eq!(summary.stopped, StopReason::Cancelled);
    assert_eq!(launcher.modulator_launches(), 1);

    let played = launcher.transcoder_inputs();
    assert_eq!(played.len(), 6);
    assert_eq!(
        played,
        [
            "/music/1.mp3",
            "/music/2.mp3",
            "http://example.com/3",
            "/music/1.mp3",
            "/music/2.mp3",
            "http://example.com/3",
        ]
    );
}

#[tokio::test]
async fn shuffled_repeat_plays_permutations() {
    let cancel = CancellationToken::new();
    let launcher = RecordingLauncher::new().cancel_after_transcoders(8, cancel.clone());
    let config = Config {
        repeat_all: true,
        shuffle: true,
        ..Config::default()
    };
    let mut orch = orchestrator(config, &launcher).with_rng(fastrand::Rng::with_seed(11));
    let tracks: TrackList = ["a", "b", "c", "d"]
        .iter()
        .map(|n| Track::local(format!("/music/{n}.mp3")))
        .collect::<Vec<_>>()
        .into();

    orch.run(&tracks, &cancel).await.unwrap();
    let played = launcher.transcoder_inputs();
    assert_eq!(played.len(), 8);
    for pass in played.chunks(4) {
        let mut sorted = pass.to_vec();
        sorted.sort();
        assert_eq!(sorted, ["/music/a.mp3", "/music/b.mp3", "/music/c.mp3", "/music/d.mp3"]);
    }
}

#[tokio::test]
async fn transcoder_before_modulator_is_a_precondition_error() {
    let launcher = RecordingLauncher::new();
    let mut orch = orchestrator(Config::default(), &launcher);
    let result = orch
        .play_track(&Track::remote("http://example.com/s"), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(PipelineError::ModulatorNotRunning)));
    assert_eq!(launcher.transcoder_launches(), 0);
}

#[tokio::test]
async fn modulator_arguments_follow_config() {
    let launcher = RecordingLauncher::new();
    let config = Config {
        frequency: 100.3,
        stereo: false,
        ..Config::default()
    };
    let mut orch = orchestrator(config, &launcher);
    orch.start_modulator().unwrap();

    let modulators = launcher.modulator_invocations();
    assert_eq!(modulators.len(), 1);
    assert_eq!(modulators[0].to_string(), "/root/pifm - 100.3 44100 mono");
}

#[tokio::test]
async fn scanned_library_plays_in_scan_order() {
    let dir = library_with(&[
        ("b/2.mp3", ""),
        ("a.wav", ""),
        ("b/1.mp3", ""),
        ("b/list.m3u", "http://example.com/b\n1.mp3\n"),
    ]);
    let tracks = library::scan(dir.path()).unwrap();
    let launcher = RecordingLauncher::new();
    let mut orch = orchestrator(Config::default(), &launcher);

    let summary = orch.run(&tracks, &CancellationToken::new()).await.unwrap();
    assert_eq!(summary.played, 5);
    let expected: Vec<String> = tracks.iter().map(|t| t.to_string()).collect();
    assert_eq!(launcher.transcoder_inputs(), expected);
}

// ── Shutdown ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_mid_track_kills_everything_once() {
    let launcher = RecordingLauncher::new().hang_transcoders();
    let reset = CountingReset::new();
    let mut orch = orchestrator(Config::default(), &launcher);
    let coordinator = Arc::new(ShutdownCoordinator::new(
        orch.processes(),
        Arc::new(reset.clone()),
    ));
    let cancel = CancellationToken::new();

    // Stand-in for the signal listener.
    let trigger = cancel.clone();
    let listener_side = Arc::clone(&coordinator);
    let listener = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
        listener_side.shutdown()
    });

    let tracks: TrackList = vec![Track::local("/music/a.mp3"), Track::local("/music/b.mp3")].into();
    let summary = orch.run(&tracks, &cancel).await.unwrap();
    let from_listener = listener.await.unwrap();
    let from_main = coordinator.shutdown();

    assert_eq!(summary.stopped, StopReason::Cancelled);
    assert_eq!(orch.state(), PipelineState::Stopped);
    assert!(from_listener.hardware_reset);
    assert!(from_listener.modulator_terminated);
    assert!(from_listener.transcoder_killed);
    assert!(from_main.already_done);
    assert_eq!(reset.calls(), 1);
    assert_eq!(launcher.terminated(), 1);
    assert_eq!(launcher.killed(), 1);
    assert_eq!(launcher.transcoder_launches(), 1);
}

#[tokio::test]
async fn shutdown_before_anything_started() {
    let launcher = RecordingLauncher::new();
    let reset = CountingReset::new();
    let orch = orchestrator(Config::default(), &launcher);
    let coordinator = ShutdownCoordinator::new(orch.processes(), Arc::new(reset.clone()));

    let first = coordinator.shutdown();
    let second = coordinator.shutdown();
    assert!(first.hardware_reset);
    assert!(!first.modulator_terminated && !first.transcoder_killed);
    assert!(second.already_done);
    assert_eq!(reset.calls(), 1);
}

#[tokio::test]
async fn modulator_failure_escalates_to_shutdown() {
    let launcher = RecordingLauncher::new()
        .hang_transcoders()
        .modulator_exits_after(5);
    let reset = CountingReset::new();
    let mut orch = orchestrator(Config::default(), &launcher);
    let coordinator = ShutdownCoordinator::new(orch.processes(), Arc::new(reset.clone()));
    let tracks: TrackList = vec![Track::local("/music/a.mp3")].into();

    let err = orch.run(&tracks, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::ModulatorExited(_)));

    let report = coordinator.shutdown();
    assert!(report.hardware_reset);
    assert!(report.transcoder_killed);
    assert_eq!(launcher.killed(), 1);
}

// ── Real processes ────────────────────────────────────────────────────────

#[cfg(unix)]
fn write_script(dir: &Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

#[cfg(unix)]
#[tokio::test]
async fn real_children_share_one_pipe() {
    use pirate_radio::process::SystemLauncher;

    let music = library_with(&[("a.mp3", "AAAA"), ("b.mp3", "BBBB")]);
    let bin = tempfile::tempdir().unwrap();
    let out = bin.path().join("broadcast.pcm");
    // Transcoder args are `-nostdin -i <input> ...`: emit the input file as is.
    let transcoder = write_script(bin.path(), "transcode", "exec cat \"$3\"");
    let modulator = write_script(
        bin.path(),
        "modulate",
        &format!("exec cat > '{}'", out.display()),
    );

    let config = Config {
        music_dir: music.path().to_path_buf(),
        transcoder,
        modulator,
        gpio_pin: None,
        ..Config::default()
    };
    let tracks = library::scan(&config.music_dir).unwrap();
    let mut orch = PipelineOrchestrator::new(Arc::new(config), Arc::new(SystemLauncher))
        .unwrap()
        .with_poll_interval(Duration::from_millis(5));
    let coordinator = ShutdownCoordinator::new(orch.processes(), Arc::new(CountingReset::new()));

    let summary = orch.run(&tracks, &CancellationToken::new()).await.unwrap();
    assert_eq!(summary.played, 2);
    assert_eq!(summary.failed, 0);

    // The modulator drains the pipe at its own pace.
    let mut written = String::new();
    for _ in 0..200 {
        written = fs::read_to_string(&out).unwrap_or_default();
        if written.len() >= 8 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(written, "AAAABBBB");

    let report = coordinator.shutdown();
    assert!(report.modulator_terminated);
    assert!(!report.transcoder_killed);
}
