//! The racing-strategy interface.
//!
//! Both strategies chase the same window — a layout-converting rewrite
//! overlapping in-flight writeback — and differ only in the coordination
//! layer. The producer/racer primitives, monitor and crash oracle are
//! shared.

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::barrier::BarrierSynchronized;
use crate::config::{Config, StrategyKind};
use crate::contention::ContinuousContention;
use crate::error::EngineError;
use crate::sync::SyncContext;

/// A way of arranging workers so the race window gets hit.
pub trait RacingStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Start every worker role for this strategy.
    ///
    /// Roles the cycle cannot run without (coordinator, producer, syncer)
    /// fail the spawn; racer/churn pools degrade to however many threads
    /// actually started, as long as that is at least one.
    fn spawn(
        &self,
        ctx: &Arc<SyncContext>,
        cfg: &Config,
        run_dir: &Path,
    ) -> Result<Vec<JoinHandle<()>>, EngineError>;
}

/// Strategy instance for a configured kind.
pub fn strategy_for(kind: StrategyKind) -> Box<dyn RacingStrategy> {
    match kind {
        StrategyKind::Barrier => Box::new(BarrierSynchronized),
        StrategyKind::Contention => Box::new(ContinuousContention),
    }
}
