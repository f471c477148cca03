//! CLI entry point.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use burst::config::{Config, DEFAULT_ARTIFACTS, DEFAULT_RACERS, DEFAULT_TARGET_DIR, StrategyKind};
use burst::engine::Engine;
use burst::platform;
use burst::state::{DEFAULT_STATE_PATH, StateFile};

#[derive(Parser)]
#[command(
    name = "burst",
    version,
    about = "Barrier-synchronized burst reproducer for filesystem writeback races",
    after_help = "WARNING: a successful run crashes the machine. Run on a disposable host\n\
                  against a scratch filesystem."
)]
struct Cli {
    /// Directory the artifact batches are created under
    #[arg(short = 'd', long = "dir", default_value = DEFAULT_TARGET_DIR)]
    dir: PathBuf,

    /// Artifacts per burst
    #[arg(short = 'f', long = "files", default_value_t = DEFAULT_ARTIFACTS)]
    files: usize,

    /// Racer (or churn worker) threads
    #[arg(short = 'c', long = "racers", default_value_t = DEFAULT_RACERS)]
    racers: usize,

    /// Racing strategy
    #[arg(long, value_enum, default_value_t = StrategyKind::Barrier)]
    strategy: StrategyKind,

    /// Run-state file used for crash detection across invocations
    #[arg(long, default_value = DEFAULT_STATE_PATH)]
    state_file: PathBuf,

    /// Apply aggressive writeback tunables before starting (needs root)
    #[arg(short = 'a', long)]
    aggressive: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    // Forensics first: a stale record means the previous run took the
    // machine down before it could mark itself stopped.
    let state = StateFile::new(&cli.state_file);
    if let Some(crash) = state
        .check_previous_run()
        .context("cannot check previous run state")?
    {
        println!("=== PREVIOUS CRASH DETECTED ===");
        println!("Last run crashed after {} seconds", crash.runtime_secs);
        println!("Cycles before crash: {}", crash.cycles);
        println!("Operations: {}", crash.operations);
        println!("Last status: {}", crash.last_status);
        println!();
    }

    if cli.aggressive {
        platform::apply_aggressive_writeback();
    }

    let cfg = Config {
        artifact_count: cli.files,
        racer_count: cli.racers,
        target_dir: cli.dir,
        strategy: cli.strategy,
        state_path: cli.state_file,
        ..Config::default()
    };

    println!("Configuration:");
    println!("  Target directory: {}", cfg.target_dir.display());
    println!("  Artifacts per burst: {}", cfg.artifact_count);
    println!("  Racer threads: {}", cfg.racer_count);
    println!("  Strategy: {}", cfg.strategy.name());
    println!("  CPUs available: {}", platform::online_cpus());
    println!();
    println!("WARNING: this WILL crash the machine when the race triggers!");
    println!("Starting in 3 seconds... (Ctrl+C to abort)");
    std::thread::sleep(Duration::from_secs(3));

    let engine = Engine::new(cfg).context("setup failed")?;
    let summary = engine.run().context("run failed")?;

    println!();
    println!("Final statistics:");
    println!("  Runtime: {} seconds", summary.elapsed.as_secs());
    println!("  Cycles: {}", summary.cycles);
    println!("  Operations: {}", summary.operations);
    println!("  Rate: {} operations/sec", summary.rate());
    println!();
    println!("If the machine is still up, the race did not trigger this time.");

    Ok(())
}
