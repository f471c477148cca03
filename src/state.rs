//! Run-state persistence and the crash oracle.
//!
//! The reproducer's success condition is that the *machine* dies, which the
//! process cannot observe. Instead, a fixed-layout record is kept durable at
//! a well-known path while running; finding it on the next start with the
//! running flag still set is the evidence that the previous run was killed
//! by the race rather than stopped.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Fixed length of the status text, NUL-padded.
pub const STATUS_LEN: usize = 64;

/// Default well-known path for the run-state record.
pub const DEFAULT_STATE_PATH: &str = "/var/tmp/burst-run-state";

/// Durable snapshot of a run. Fixed layout, fully overwritten on each save.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RunStateRecord {
    /// Unix seconds when the run started.
    pub started_at: i64,
    /// Unix seconds of the last heartbeat.
    pub last_update: i64,
    /// Completed burst cycles.
    pub cycles: u64,
    /// Completed racing operations.
    pub operations: u64,
    /// Non-zero while the process considers itself alive.
    pub is_running: u32,
    reserved: [u8; 4],
    /// NUL-padded status text.
    pub status: [u8; STATUS_LEN],
}

const _: () = {
    assert!(size_of::<RunStateRecord>() == 104);
};

impl RunStateRecord {
    pub fn new(
        started_at: i64,
        last_update: i64,
        cycles: u64,
        operations: u64,
        is_running: bool,
        status: &str,
    ) -> Self {
        Self {
            started_at,
            last_update,
            cycles,
            operations,
            is_running: u32::from(is_running),
            reserved: [0; 4],
            status: encode_status(status),
        }
    }

    /// Status text up to the first NUL.
    pub fn status_text(&self) -> String {
        let end = self
            .status
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(STATUS_LEN);
        String::from_utf8_lossy(&self.status[..end]).into_owned()
    }
}

/// Copy `status` into a fixed NUL-padded buffer, truncating to keep the
/// final byte NUL.
fn encode_status(status: &str) -> [u8; STATUS_LEN] {
    let mut buf = [0u8; STATUS_LEN];
    let len = status.len().min(STATUS_LEN - 1);
    buf[..len].copy_from_slice(&status.as_bytes()[..len]);
    buf
}

/// Current time as unix seconds.
pub fn unix_now() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(_) => 0,
    }
}

/// What the oracle can reconstruct about a crashed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForensicSummary {
    /// Seconds between start and the last heartbeat before the crash.
    pub runtime_secs: i64,
    pub cycles: u64,
    pub operations: u64,
    pub last_status: String,
}

/// Handle to the well-known state file.
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the record and force it durable before returning.
    pub fn save(&self, record: &RunStateRecord) -> io::Result<()> {
        let mut file = File::create(&self.path)?;
        file.write_all(record.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Read the stored record, if a well-formed one exists.
    ///
    /// A missing file and a record of the wrong size both read as `None`;
    /// a short or oversized file is stale debris, not a crashed run.
    pub fn load(&self) -> io::Result<Option<RunStateRecord>> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(RunStateRecord::read_from_bytes(bytes.as_slice()).ok())
    }

    /// Check whether the previous run terminated without marking itself
    /// stopped.
    ///
    /// If the stored record still has the running flag set, the previous
    /// process never reached its exit path — the race fired. The record is
    /// consumed (file removed) and its summary returned. A clean record or
    /// an absent file yields `None`.
    pub fn check_previous_run(&self) -> io::Result<Option<ForensicSummary>> {
        let Some(record) = self.load()? else {
            return Ok(None);
        };
        if record.is_running == 0 {
            return Ok(None);
        }

        let summary = ForensicSummary {
            runtime_secs: record.last_update.saturating_sub(record.started_at),
            cycles: record.cycles,
            operations: record.operations,
            last_status: record.status_text(),
        };
        self.remove()?;
        Ok(Some(summary))
    }

    /// Remove the state file. Absence is not an error.
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_in(dir: &tempfile::TempDir) -> StateFile {
        StateFile::new(dir.path().join("run-state"))
    }

    #[test]
    fn save_then_load_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(&dir);

        let record = RunStateRecord::new(1000, 1060, 42, 9001, true, "running");
        state.save(&record).unwrap();

        let loaded = state.load().unwrap().expect("record should exist");
        assert_eq!(loaded.as_bytes(), record.as_bytes());
        assert_eq!(loaded.status_text(), "running");
    }

    #[test]
    fn stale_running_record_reports_crash_and_consumes_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(&dir);

        let record = RunStateRecord::new(1000, 1360, 7, 1234, true, "running");
        state.save(&record).unwrap();

        let summary = state
            .check_previous_run()
            .unwrap()
            .expect("crash must be detected");
        assert_eq!(summary.runtime_secs, 360);
        assert_eq!(summary.cycles, 7);
        assert_eq!(summary.operations, 1234);
        assert_eq!(summary.last_status, "running");
        assert!(!state.path().exists());

        // A second check finds nothing.
        assert_eq!(state.check_previous_run().unwrap(), None);
    }

    #[test]
    fn clean_record_is_not_a_crash() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(&dir);

        let record = RunStateRecord::new(1000, 1060, 3, 300, false, "stopped by signal");
        state.save(&record).unwrap();
        assert_eq!(state.check_previous_run().unwrap(), None);
    }

    #[test]
    fn absent_and_malformed_files_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(&dir);

        assert!(state.load().unwrap().is_none());
        assert_eq!(state.check_previous_run().unwrap(), None);

        fs::write(state.path(), b"not a record").unwrap();
        assert!(state.load().unwrap().is_none());
        assert_eq!(state.check_previous_run().unwrap(), None);
    }

    #[test]
    fn long_status_is_truncated_with_trailing_nul() {
        let long = "x".repeat(200);
        let record = RunStateRecord::new(0, 0, 0, 0, true, &long);
        assert_eq!(record.status_text().len(), STATUS_LEN - 1);
        assert_eq!(record.status[STATUS_LEN - 1], 0);
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(&dir);
        state.remove().unwrap();
        state.remove().unwrap();
    }
}
