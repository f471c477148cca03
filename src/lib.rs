//! burst: barrier-synchronized reproducer for filesystem writeback races.
//!
//! Some filesystems keep very small files inside metadata (ext4 inline
//! data, tail packing) and convert them to a regular layout once they grow.
//! If that conversion lands while writeback for the old layout is still in
//! flight, a narrow kernel race opens. This crate makes that window wide:
//! coordinated worker roles create batches of compact files, kick
//! non-blocking writeback over them, and immediately expand every file past
//! the threshold on pinned CPUs.
//!
//! Success means the *machine* goes down, so the tool keeps a durable
//! liveness record; finding it stale on the next start is the evidence the
//! race fired. See [`state::StateFile::check_previous_run`].
//!
//! # Example
//!
//! ```ignore
//! use burst::config::Config;
//! use burst::engine::Engine;
//!
//! let engine = Engine::new(Config::default())?;
//! let summary = engine.run()?; // blocks until SIGINT/SIGTERM
//! println!("{} operations over {} cycles", summary.operations, summary.cycles);
//! ```

pub mod artifact;
pub mod barrier;
pub mod config;
pub mod contention;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod platform;
pub mod state;
pub mod strategy;
pub mod sync;

pub use config::{Config, StrategyKind};
pub use engine::{Engine, RunSummary};
pub use error::EngineError;
pub use state::{ForensicSummary, StateFile};
pub use sync::{BarrierState, Phase, SyncContext};
