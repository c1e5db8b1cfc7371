//! Oxidized-Cell - PS3 Emulator
//!
//! Headless session runner: boots a game, runs it until the guest finishes,
//! the host asks to exit or the time limit passes, then stops cleanly.

use anyhow::{bail, Context};
use clap::Parser;
use oc_core::{Config, ConfigStore, ThreadRegistry, WorkerRegistry};
use oc_integration::{headless_services, HeadlessHost, Session};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Interval of the host loop
const HOST_TICK: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(
    name = "oxidized-session",
    about = "Boot a PS3 executable or game directory in a headless session."
)]
struct Args {
    /// Executable, or a game directory containing EBOOT.BIN
    path: String,

    /// Configuration directory (defaults to the platform config dir)
    #[arg(long, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Boot `path` as a file instead of probing a game directory
    #[arg(long, action = clap::ArgAction::SetTrue)]
    direct: bool,

    /// Stop the session after this many seconds
    #[arg(long, value_name = "SECS")]
    run_for: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_dir = args.config_dir.unwrap_or_else(Config::default_config_dir);

    // Logging is configured before the session exists
    let boot_config = ConfigStore::new();
    boot_config
        .merge_file(&Config::config_path(&config_dir))
        .with_context(|| format!("failed to read configuration in {}", config_dir.display()))?;
    oc_core::logging::init(&boot_config.snapshot(), &config_dir)?;

    tracing::info!("Starting Oxidized-Cell session");

    let registry = Arc::new(WorkerRegistry::new());
    let host = Arc::new(HeadlessHost::new());
    let session = Session::new(&config_dir, headless_services(registry.clone(), host.clone()));
    session.init();

    if !session.boot_game(&args.path, args.direct) {
        bail!("no executable found at {}", args.path);
    }
    if session.is_stopped() {
        bail!("failed to boot {}", args.path);
    }
    if session.is_ready() {
        session.run();
    }

    let deadline = args.run_for.map(|secs| Instant::now() + Duration::from_secs(secs));
    while session.is_running() || session.is_paused() {
        if session.is_stop_requested() || host.exit_requested() || registry.count_live() == 0 {
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::info!("Time limit reached");
            break;
        }
        std::thread::sleep(HOST_TICK);
    }

    session.stop();
    tracing::info!("Session finished");
    Ok(())
}
