//! Run configuration and bounds.
//!
//! Values outside the documented bounds are clamped, never rejected: a
//! sloppy invocation should still exert pressure rather than exit.

use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use tracing::warn;

use crate::state::DEFAULT_STATE_PATH;

pub const MIN_ARTIFACTS: usize = 10;
pub const MAX_ARTIFACTS: usize = 10_000;
pub const DEFAULT_ARTIFACTS: usize = 1_000;

pub const MIN_RACERS: usize = 1;
pub const MAX_RACERS: usize = 64;
pub const DEFAULT_RACERS: usize = 16;

pub const DEFAULT_TARGET_DIR: &str = "/mnt/ext4-test/burst";

/// Heartbeat cadence for the monitor (state saves + progress line).
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(1);

/// Forced-flush cadence for the continuous-contention syncer.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_millis(100);

/// Which racing strategy drives the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyKind {
    /// Coordinator-driven 4-phase cycles with precise rendezvous.
    Barrier,
    /// Uncoordinated churn workers plus a periodic blocking flush.
    Contention,
}

impl StrategyKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Barrier => "barrier-synchronized",
            Self::Contention => "continuous-contention",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Matches the clap value names so defaults render parseably.
        let s = match self {
            Self::Barrier => "barrier",
            Self::Contention => "contention",
        };
        f.write_str(s)
    }
}

/// Validated run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Artifacts per batch (clamped to `MIN_ARTIFACTS..=MAX_ARTIFACTS`).
    pub artifact_count: usize,
    /// Racer / churn worker threads (clamped to `MIN_RACERS..=MAX_RACERS`).
    pub racer_count: usize,
    /// Directory the artifact batches live under.
    pub target_dir: PathBuf,
    /// Racing strategy.
    pub strategy: StrategyKind,
    /// Well-known path for the persistent run state.
    pub state_path: PathBuf,
    /// Monitor heartbeat interval.
    pub heartbeat: Duration,
    /// Syncer flush interval (continuous-contention only).
    pub sync_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            artifact_count: DEFAULT_ARTIFACTS,
            racer_count: DEFAULT_RACERS,
            target_dir: PathBuf::from(DEFAULT_TARGET_DIR),
            strategy: StrategyKind::Barrier,
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            heartbeat: DEFAULT_HEARTBEAT,
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

impl Config {
    /// Clamp every numeric field into its documented bounds, logging any
    /// adjustment. Called once before any thread starts.
    pub fn clamped(mut self) -> Self {
        self.artifact_count = clamp_field(
            "artifact_count",
            self.artifact_count,
            MIN_ARTIFACTS,
            MAX_ARTIFACTS,
        );
        self.racer_count = clamp_field("racer_count", self.racer_count, MIN_RACERS, MAX_RACERS);
        self
    }
}

fn clamp_field(name: &str, value: usize, min: usize, max: usize) -> usize {
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!(field = name, requested = value, using = clamped, "value out of bounds, clamped");
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_bounds_values_are_clamped_not_rejected() {
        let cfg = Config {
            artifact_count: 3,
            racer_count: 500,
            ..Config::default()
        }
        .clamped();
        assert_eq!(cfg.artifact_count, MIN_ARTIFACTS);
        assert_eq!(cfg.racer_count, MAX_RACERS);
    }

    #[test]
    fn in_bounds_values_pass_through() {
        let cfg = Config {
            artifact_count: 250,
            racer_count: 4,
            ..Config::default()
        }
        .clamped();
        assert_eq!(cfg.artifact_count, 250);
        assert_eq!(cfg.racer_count, 4);
    }
}
