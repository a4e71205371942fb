use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pirate_radio::config::{Config, DEFAULT_CONFIG_PATH};
use pirate_radio::library;
use pirate_radio::pipeline::PipelineOrchestrator;
use pirate_radio::process::SystemLauncher;
use pirate_radio::shutdown::{
    NoTransmitter, ShutdownCoordinator, SysfsGpio, TransmitterReset, listen_for_termination,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pirateradio", about = "Broadcast a music library over FM")]
struct Cli {
    /// Config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Fork into the background before broadcasting
    #[arg(short, long)]
    daemon: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Broadcast the music library (default)
    Run,
    /// Print the tracks that would be played, in order
    Scan {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as JSON
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match try_main(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn try_main(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(&cli.config);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Scan { json } => {
            let tracks = library::scan(&config.music_dir)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tracks)?);
            } else {
                for (i, track) in tracks.iter().enumerate() {
                    println!("{:>4}  {}", i + 1, track);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run => {
            if cli.daemon {
                daemonize()?;
            }
            println!("To stop run 'kill -15 {}'", std::process::id());

            // Built after forking: a runtime's worker threads do not survive fork.
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            runtime.block_on(broadcast(config))
        }
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}

async fn broadcast(config: Config) -> Result<ExitCode> {
    let config = Arc::new(config);
    let cancel = CancellationToken::new();
    let listener = listen_for_termination(cancel.clone());

    info!("Playing songs to frequency {}", config.frequency);
    info!("Shuffle is {}", on_off(config.shuffle));
    info!("Repeat All is {}", on_off(config.repeat_all));
    info!("Stereo playback is {}", on_off(config.stereo));

    let mut orchestrator = PipelineOrchestrator::new(Arc::clone(&config), Arc::new(SystemLauncher))?;
    let transmitter: Arc<dyn TransmitterReset> = match config.gpio_pin {
        Some(pin) => Arc::new(SysfsGpio::new(pin)),
        None => Arc::new(NoTransmitter),
    };
    let coordinator = ShutdownCoordinator::new(orchestrator.processes(), transmitter);

    let result = match library::scan(&config.music_dir) {
        Ok(tracks) => orchestrator.run(&tracks, &cancel).await.map_err(anyhow::Error::from),
        Err(e) => Err(anyhow::Error::from(e)),
    };

    // Every way out goes through the same teardown.
    cancel.cancel();
    coordinator.shutdown();
    let _ = listener.await;

    match result {
        Ok(summary) => {
            info!(
                "Stopped ({:?}) after {} pass(es): {} played, {} failed",
                summary.stopped, summary.passes, summary.played, summary.failed
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("Playback stopped: {e:#}");
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(unix)]
fn daemonize() -> Result<()> {
    // SAFETY: called before any thread is spawned.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(std::io::Error::last_os_error()).context("fork failed");
    }
    if pid > 0 {
        std::process::exit(0);
    }
    // SAFETY: plain syscall in the freshly forked child.
    if unsafe { libc::setsid() } < 0 {
        warn!("setsid failed: {}", std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn daemonize() -> Result<()> {
    warn!("--daemon is only supported on unix; staying in the foreground");
    Ok(())
}
