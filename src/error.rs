//! Engine error taxonomy.
//!
//! Per-artifact I/O failures never surface here; they are skipped at the
//! call site. These variants cover the failures that abort a run before or
//! during thread startup.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Target or run directory could not be prepared. Fatal before any
    /// thread starts.
    #[error("cannot prepare directory {path}")]
    Setup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The stop-signal handler could not be installed.
    #[error("cannot install stop handler")]
    StopHandler(#[source] io::Error),

    /// A role the cycle cannot proceed without failed to start.
    #[error("cannot start {role} thread")]
    Spawn {
        role: &'static str,
        #[source]
        source: io::Error,
    },

    /// A degradable pool ended up with zero members.
    #[error("no {role} threads could be started")]
    NoWorkers { role: &'static str },
}
