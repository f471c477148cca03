//! Continuous-contention strategy: volume instead of rendezvous.
//!
//! Churn workers loop create → reopen → expand → delete against private
//! file sets with no shared phase; a syncer forces a blocking
//! whole-filesystem flush at a fixed interval. Overlap with writeback comes
//! from sustained pressure and thread count rather than precise timing, so
//! this variant is simpler, self-sustaining and less precise.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use crate::artifact::ArtifactTable;
use crate::config::{Config, StrategyKind};
use crate::error::EngineError;
use crate::platform;
use crate::strategy::RacingStrategy;
use crate::sync::SyncContext;

pub struct ContinuousContention;

impl RacingStrategy for ContinuousContention {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Contention
    }

    fn spawn(
        &self,
        ctx: &Arc<SyncContext>,
        cfg: &Config,
        run_dir: &Path,
    ) -> Result<Vec<JoinHandle<()>>, EngineError> {
        // Directory handle for syncfs. Failing to open it means no flush
        // pressure at all, which is fatal the same way a missing
        // coordinator would be.
        let dir = File::open(run_dir).map_err(|source| EngineError::Setup {
            path: run_dir.to_path_buf(),
            source,
        })?;

        let mut handles = Vec::with_capacity(cfg.racer_count + 1);

        {
            let ctx = Arc::clone(ctx);
            let interval = cfg.sync_interval;
            let handle = thread::Builder::new()
                .name("syncer".into())
                .spawn(move || syncer_loop(&ctx, &dir, interval))
                .map_err(|source| EngineError::Spawn {
                    role: "syncer",
                    source,
                })?;
            handles.push(handle);
        }

        // Each churn worker owns a private slice of the artifact budget so
        // workers never contend on paths, only on the filesystem itself.
        let per_worker = (cfg.artifact_count / cfg.racer_count).max(1);
        let mut started = 0usize;
        for id in 0..cfg.racer_count {
            let ctx = Arc::clone(ctx);
            let dir = run_dir.to_path_buf();
            let spawned = thread::Builder::new()
                .name(format!("churn-{id}"))
                .spawn(move || churn_loop(&ctx, &dir, id, per_worker));
            match spawned {
                Ok(handle) => {
                    handles.push(handle);
                    started += 1;
                }
                Err(e) => warn!(id, error = %e, "churn thread failed to start, degrading"),
            }
        }
        if started == 0 {
            // Unwind the syncer rather than leaving it flushing for nobody.
            ctx.cancel();
            return Err(EngineError::NoWorkers { role: "churn" });
        }

        debug!(workers = started, per_worker, "contention strategy online");
        Ok(handles)
    }
}

/// Syncer: periodic blocking flush of the whole target filesystem.
///
/// Each flush round counts as one cycle; it is the closest thing this
/// strategy has to a burst boundary.
fn syncer_loop(ctx: &SyncContext, dir: &File, interval: std::time::Duration) {
    platform::pin_current_thread(0);

    while ctx.nap(interval) {
        if let Err(e) = platform::flush_filesystem(dir) {
            warn!(error = %e, "filesystem flush failed");
        }
        ctx.barrier().complete_cycle();
    }
}

/// Churn worker: create, reopen, expand, delete, forever.
fn churn_loop(ctx: &SyncContext, dir: &Path, id: usize, count: usize) {
    platform::pin_current_thread(1 + id);

    // A private table: no other worker touches these paths, so the
    // exclusive accessor is trivially safe here.
    let table = ArtifactTable::new_prefixed(dir, count, &format!("w{id}-"));
    debug!(id, count, "churn worker online");

    while !ctx.is_cancelled() {
        let mut expanded = 0u64;
        let mut failed = 0u64;
        // SAFETY: this worker is the sole owner of its private table.
        for slot in unsafe { table.slots_mut() } {
            if ctx.is_cancelled() {
                break;
            }
            let churned = (|| {
                slot.create_compact()?;
                slot.reopen()?;
                slot.expand()?;
                slot.discard()
            })();
            match churned {
                Ok(()) => expanded += 1,
                Err(e) => {
                    failed += 1;
                    trace!(path = %slot.path().display(), error = %e, "churn failed");
                    // Leave nothing half-made behind before moving on.
                    let _ = slot.discard();
                }
            }
        }
        ctx.add_operations(expanded);
        if failed > 0 {
            ctx.add_operation_failures(failed);
        }
    }

    // SAFETY: sole owner, and every role is unwinding by now.
    unsafe { table.cleanup() };
}
