//! Heartbeat monitor.
//!
//! Purely observational: samples counters and writeback pressure, persists
//! a run-state snapshot for the crash oracle, and emits one progress line
//! per interval. Correctness of the racing engine never depends on it.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::platform;
use crate::state::{RunStateRecord, StateFile, unix_now};
use crate::sync::SyncContext;

/// Run the heartbeat until cancellation or a stop signal.
///
/// Occupies the calling thread (the engine runs it on its main thread, the
/// one role that does not need pinning). Returns once a stop is observed;
/// the final state save is the engine's job.
pub fn run(ctx: &SyncContext, state: &StateFile, started_at: i64, interval: Duration) {
    let started = Instant::now();

    heartbeat(ctx, state, started_at, started.elapsed());
    loop {
        if !ctx.nap(interval) {
            return;
        }
        if platform::stop_requested() {
            return;
        }
        heartbeat(ctx, state, started_at, started.elapsed());
    }
}

fn heartbeat(ctx: &SyncContext, state: &StateFile, started_at: i64, elapsed: Duration) {
    let cycles = ctx.barrier().cycle_count();
    let operations = ctx.operations();

    let record = RunStateRecord::new(started_at, unix_now(), cycles, operations, true, "running");
    if let Err(e) = state.save(&record) {
        warn!(path = %state.path().display(), error = %e, "state save failed");
    }

    let secs = elapsed.as_secs().max(1);
    match platform::writeback_pressure() {
        Some(p) => info!(
            elapsed_secs = elapsed.as_secs(),
            cycles,
            operations,
            ops_per_sec = operations / secs,
            dirty_kb = p.dirty_bytes / 1024,
            writeback_kb = p.writeback_bytes / 1024,
            "progress"
        ),
        None => info!(
            elapsed_secs = elapsed.as_secs(),
            cycles,
            operations,
            ops_per_sec = operations / secs,
            "progress"
        ),
    }
}
