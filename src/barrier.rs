//! Barrier-synchronized strategy: coordinator-driven burst cycles.
//!
//! One cycle:
//!
//! 1. PRODUCE  — producer creates the compact batch, descriptors held open.
//! 2. TRIGGER  — coordinator starts non-blocking writeback over the batch.
//! 3. RACE     — racers expand their assigned slots while the flush is in
//!               flight. This is the window being attacked.
//! 4. CLEANUP  — producer unlinks the batch and re-arms PRODUCE.
//!
//! Boundary ownership: PRODUCE→TRIGGER is a producer/coordinator
//! rendezvous, TRIGGER→RACE belongs to the coordinator alone, RACE→CLEANUP
//! to the last racer home, CLEANUP→PRODUCE to the producer alone.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use crate::artifact::{ArtifactTable, assignment};
use crate::config::{Config, StrategyKind};
use crate::error::EngineError;
use crate::platform;
use crate::strategy::RacingStrategy;
use crate::sync::{Phase, SyncContext};

/// Participants in the PRODUCE→TRIGGER rendezvous: producer + coordinator.
const TRIGGER_PARTIES: u32 = 2;

type RoleFn = fn(&SyncContext, &ArtifactTable);

pub struct BarrierSynchronized;

impl RacingStrategy for BarrierSynchronized {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Barrier
    }

    fn spawn(
        &self,
        ctx: &Arc<SyncContext>,
        cfg: &Config,
        run_dir: &Path,
    ) -> Result<Vec<JoinHandle<()>>, EngineError> {
        let table = Arc::new(ArtifactTable::new(run_dir, cfg.artifact_count));
        let mut handles = Vec::with_capacity(cfg.racer_count + 2);

        // Racers first, so the quorum is known before any cycle can start.
        let mut started = 0u32;
        for id in 0..cfg.racer_count {
            let ctx = Arc::clone(ctx);
            let table = Arc::clone(&table);
            let configured = cfg.racer_count;
            let spawned = thread::Builder::new()
                .name(format!("racer-{id}"))
                .spawn(move || racer_loop(&ctx, &table, id, configured));
            match spawned {
                Ok(handle) => {
                    handles.push(handle);
                    started += 1;
                }
                Err(e) => warn!(id, error = %e, "racer thread failed to start, degrading"),
            }
        }
        if started == 0 {
            return Err(EngineError::NoWorkers { role: "racer" });
        }
        ctx.set_racer_quorum(started);

        // Producer and coordinator are load-bearing: no cycle without them.
        // On failure, cancel so the already-started racers unwind instead
        // of waiting for a RACE phase that will never come.
        for (role, entry) in [("producer", producer_loop as RoleFn), ("coordinator", coordinator_loop)] {
            let ctx_role = Arc::clone(ctx);
            let table = Arc::clone(&table);
            let spawned = thread::Builder::new()
                .name(role.into())
                .spawn(move || entry(&ctx_role, &table));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    ctx.cancel();
                    return Err(EngineError::Spawn { role, source });
                }
            }
        }

        debug!(racers = started, artifacts = table.len(), "barrier strategy online");
        Ok(handles)
    }
}

/// Coordinator: owns the TRIGGER window.
fn coordinator_loop(ctx: &SyncContext, table: &ArtifactTable) {
    platform::pin_current_thread(0);

    while !ctx.is_cancelled() {
        if !ctx.wait_for(Phase::Produce) {
            break;
        }
        // Rendezvous with the producer; whichever of the two signals last
        // performs the PRODUCE→TRIGGER advance.
        if !ctx.signal_and_wait(Phase::Trigger, TRIGGER_PARTIES) {
            break;
        }

        // Start writeback over the whole batch while it is still compact.
        // The hint must not wait for disk: the racers' rewrite below has to
        // overlap the flush, not follow it.
        //
        // SAFETY: during TRIGGER the producer is parked waiting for CLEANUP
        // and racers are parked waiting for RACE; the coordinator is the
        // only role touching the table.
        let mut hinted = 0usize;
        for slot in unsafe { table.slots() } {
            if let Some(file) = slot.file() {
                match platform::flush_hint(file) {
                    Ok(()) => hinted += 1,
                    Err(e) => trace!(path = %slot.path().display(), error = %e, "flush hint failed"),
                }
            }
        }
        trace!(hinted, "writeback hinted, releasing racers");

        // Release the racers into the open window.
        ctx.barrier().advance(Phase::Race);

        // The last racer flips RACE→CLEANUP.
        if !ctx.wait_while(Phase::Race) {
            break;
        }

        let cycles = ctx.barrier().complete_cycle();
        if cycles % 10 == 0 {
            debug!(
                cycles,
                operations = ctx.operations(),
                "burst cycle milestone"
            );
        }
    }
}

/// Producer: creates the batch, tears it down, re-arms the cycle.
fn producer_loop(ctx: &SyncContext, table: &ArtifactTable) {
    platform::pin_current_thread(1);

    while !ctx.is_cancelled() {
        // SAFETY: during PRODUCE the producer exclusively owns the table.
        let created = unsafe { table.produce() };
        if created < table.len() {
            debug!(
                created,
                skipped = table.len() - created,
                "batch produced with skips"
            );
        }

        // Batch ready. Ownership of the descriptors releases at TRIGGER.
        if !ctx.signal_and_wait(Phase::Trigger, TRIGGER_PARTIES) {
            break;
        }

        if !ctx.wait_for(Phase::Cleanup) {
            break;
        }

        // SAFETY: during CLEANUP the racers are done (they flipped the
        // phase) and the coordinator is waiting out RACE's end; the
        // producer exclusively owns the table again.
        unsafe { table.cleanup() };
        ctx.barrier().advance(Phase::Produce);
    }
}

/// Racer: expands its assigned slot range each RACE phase.
fn racer_loop(ctx: &SyncContext, table: &ArtifactTable, id: usize, configured: usize) {
    platform::pin_current_thread(2 + id);

    let range = assignment(table.len(), configured, id);
    debug!(id, start = range.start, end = range.end, "racer online");

    while !ctx.is_cancelled() {
        if !ctx.wait_for(Phase::Race) {
            break;
        }

        // Expand immediately: every instruction here narrows the overlap
        // with the in-flight flush.
        //
        // SAFETY: assignments are disjoint, so this racer is the only role
        // touching slots in `range` during RACE, and the mutation itself
        // goes through `&File`.
        let slots = unsafe { table.slots() };
        let mut converted = 0u64;
        let mut failed = 0u64;
        for slot in &slots[range.clone()] {
            match slot.expand() {
                Ok(()) => converted += 1,
                Err(e) => {
                    failed += 1;
                    trace!(path = %slot.path().display(), error = %e, "mutation failed");
                }
            }
        }
        ctx.add_operations(converted);
        if failed > 0 {
            ctx.add_operation_failures(failed);
            debug!(id, failed, "mutations failed this cycle");
        }

        // Last racer home hands the batch back for teardown.
        if !ctx.signal_and_wait(Phase::Cleanup, ctx.racer_quorum()) {
            break;
        }
    }
}
