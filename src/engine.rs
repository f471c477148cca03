//! Engine: setup, worker lifecycle and shutdown.
//!
//! Owns the startup order the crash oracle depends on: directories and
//! handlers before threads, an initial durable state save before the first
//! cycle, one final save after cancellation, and state-file removal only on
//! the clean exit path.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::EngineError;
use crate::monitor;
use crate::platform;
use crate::state::{RunStateRecord, StateFile, unix_now};
use crate::strategy::strategy_for;
use crate::sync::SyncContext;

/// Final counters for a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub elapsed: Duration,
    pub cycles: u64,
    pub operations: u64,
    pub operation_failures: u64,
}

impl RunSummary {
    /// Operations per second over the whole run.
    pub fn rate(&self) -> u64 {
        self.operations / self.elapsed.as_secs().max(1)
    }
}

/// A prepared run: directories exist, nothing is started yet.
pub struct Engine {
    cfg: Config,
    ctx: Arc<SyncContext>,
    state: StateFile,
    run_dir: PathBuf,
}

impl Engine {
    /// Validate configuration and prepare the target directory.
    ///
    /// Each run gets a unique subdirectory so concurrent invocations (or
    /// debris from a crashed one) never collide. Setup failure is fatal:
    /// nothing has been spawned yet and nothing can proceed.
    pub fn new(cfg: Config) -> Result<Self, EngineError> {
        let cfg = cfg.clamped();

        fs::create_dir_all(&cfg.target_dir).map_err(|source| EngineError::Setup {
            path: cfg.target_dir.clone(),
            source,
        })?;
        let run_dir = cfg
            .target_dir
            .join(format!("run-{}-{}", std::process::id(), Uuid::new_v4()));
        fs::create_dir_all(&run_dir).map_err(|source| EngineError::Setup {
            path: run_dir.clone(),
            source,
        })?;

        Ok(Self {
            state: StateFile::new(&cfg.state_path),
            ctx: Arc::new(SyncContext::new()),
            run_dir,
            cfg,
        })
    }

    /// Shared context, e.g. to cancel the run from another thread.
    pub fn context(&self) -> Arc<SyncContext> {
        Arc::clone(&self.ctx)
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Run until a stop signal or cancellation, then unwind cleanly.
    pub fn run(&self) -> Result<RunSummary, EngineError> {
        platform::install_stop_handler().map_err(EngineError::StopHandler)?;

        let strategy = strategy_for(self.cfg.strategy);
        info!(
            strategy = strategy.kind().name(),
            artifacts = self.cfg.artifact_count,
            racers = self.cfg.racer_count,
            dir = %self.run_dir.display(),
            cpus = platform::online_cpus(),
            "starting"
        );

        let started_at = unix_now();
        let started = Instant::now();
        let handles = strategy.spawn(&self.ctx, &self.cfg, &self.run_dir)?;

        // Blocks here for the life of the run; the monitor persists the
        // liveness snapshots the oracle reads after a crash.
        monitor::run(&self.ctx, &self.state, started_at, self.cfg.heartbeat);

        // Stop observed: unblock every role, then write the record that
        // marks this a deliberate stop rather than a crash.
        let stopped_by_signal = platform::stop_requested();
        self.ctx.cancel();

        let status = if stopped_by_signal {
            "stopped by signal"
        } else {
            "stopped"
        };
        let record = RunStateRecord::new(
            started_at,
            unix_now(),
            self.ctx.barrier().cycle_count(),
            self.ctx.operations(),
            false,
            status,
        );
        if let Err(e) = self.state.save(&record) {
            warn!(error = %e, "final state save failed");
        }

        for handle in handles {
            let name = handle.thread().name().unwrap_or("worker").to_owned();
            if handle.join().is_err() {
                warn!(thread = %name, "worker panicked");
            }
        }

        let summary = RunSummary {
            elapsed: started.elapsed(),
            cycles: self.ctx.barrier().cycle_count(),
            operations: self.ctx.operations(),
            operation_failures: self.ctx.operation_failures(),
        };
        info!(
            elapsed_secs = summary.elapsed.as_secs(),
            cycles = summary.cycles,
            operations = summary.operations,
            failures = summary.operation_failures,
            status,
            "stopped"
        );

        // Clean exit: consume the state file and the run directory. If the
        // race fires first, neither line is reached and the stale record
        // becomes next start's evidence.
        if let Err(e) = self.state.remove() {
            warn!(error = %e, "cannot remove state file");
        }
        if let Err(e) = fs::remove_dir_all(&self.run_dir) {
            warn!(error = %e, "cannot remove run directory");
        }

        Ok(summary)
    }
}
