//! Platform capabilities: CPU pinning, stop signals, flush primitives and
//! writeback pressure sampling.
//!
//! The synchronization core stays portable by going through this module;
//! everything Linux-specific is gated here and degrades to a best-effort
//! fallback elsewhere.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

/// Set by the signal handler; bridged into the engine's cancellation flag
/// at the next heartbeat poll.
static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Number of online logical CPUs, at least 1.
pub fn online_cpus() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n < 1 { 1 } else { n as usize }
}

/// Pin the calling thread to logical CPU `index % online_cpus()`.
///
/// Pinning is advisory: on failure (or off Linux) the thread simply stays
/// under normal scheduling.
pub fn pin_current_thread(index: usize) {
    #[cfg(target_os = "linux")]
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(index % online_cpus(), &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            warn!(index, error = %io::Error::last_os_error(), "CPU pinning failed");
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = index;
    }
}

extern "C" fn handle_stop(_sig: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

/// Install SIGINT/SIGTERM handlers that request a stop.
///
/// The handler only sets a flag; the final state save happens on the main
/// thread once the flag is observed, keeping the handler async-signal-safe.
pub fn install_stop_handler() -> io::Result<()> {
    let handler = handle_stop as extern "C" fn(libc::c_int);
    for sig in [libc::SIGINT, libc::SIGTERM] {
        let prev = unsafe { libc::signal(sig, handler as libc::sighandler_t) };
        if prev == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Whether a stop signal has been delivered.
pub fn stop_requested() -> bool {
    STOP_REQUESTED.load(Ordering::SeqCst)
}

/// Start writeback for a file without waiting for it to reach disk.
///
/// This must not block: the whole point is that racer mutations overlap the
/// in-flight writeback rather than following it. On Linux this is
/// `sync_file_range(fd, 0, 0, SYNC_FILE_RANGE_WRITE)`; elsewhere there is
/// no non-blocking equivalent and the hint is a no-op.
pub fn flush_hint(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        let rc =
            unsafe { libc::sync_file_range(file.as_raw_fd(), 0, 0, libc::SYNC_FILE_RANGE_WRITE) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = file;
        Ok(())
    }
}

/// Blocking flush of the whole filesystem containing `file`.
///
/// Used by the continuous-contention syncer, where sustained pressure
/// replaces precise timing. On Linux this is `syncfs`; elsewhere it falls
/// back to a global `sync`.
pub fn flush_filesystem(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        let rc = unsafe { libc::syncfs(file.as_raw_fd()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = file;
        unsafe { libc::sync() };
        Ok(())
    }
}

/// Pending and in-flight writeback byte counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritebackPressure {
    /// Bytes dirtied but not yet queued for writeback.
    pub dirty_bytes: u64,
    /// Bytes currently being written back.
    pub writeback_bytes: u64,
}

/// Sample `/proc/meminfo` for writeback pressure. Returns `None` where the
/// counters are unavailable.
pub fn writeback_pressure() -> Option<WritebackPressure> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let mut dirty = None;
    let mut writeback = None;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("Dirty:") {
            dirty = parse_kb(rest);
        } else if let Some(rest) = line.strip_prefix("Writeback:") {
            writeback = parse_kb(rest);
        }
    }
    Some(WritebackPressure {
        dirty_bytes: dirty? * 1024,
        writeback_bytes: writeback? * 1024,
    })
}

fn parse_kb(rest: &str) -> Option<u64> {
    rest.trim().split_whitespace().next()?.parse().ok()
}

/// Writeback tunables that shrink the dirty-page window, making the kernel
/// flush early and often. Applied only with the aggressive flag; every
/// write is best-effort since `/proc/sys` needs privileges.
const AGGRESSIVE_TUNABLES: &[(&str, &str)] = &[
    ("/proc/sys/vm/dirty_writeback_centisecs", "10"),
    ("/proc/sys/vm/dirty_expire_centisecs", "100"),
    ("/proc/sys/vm/dirty_background_ratio", "2"),
    ("/proc/sys/vm/dirty_ratio", "5"),
];

/// Apply aggressive writeback settings. Failures are logged, not fatal.
pub fn apply_aggressive_writeback() {
    for (path, value) in AGGRESSIVE_TUNABLES {
        if let Err(e) = std::fs::write(Path::new(path), value) {
            warn!(path, error = %e, "cannot apply writeback tunable");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_cpus_is_positive() {
        assert!(online_cpus() >= 1);
    }

    #[test]
    fn parse_kb_handles_meminfo_format() {
        assert_eq!(parse_kb("     1234 kB"), Some(1234));
        assert_eq!(parse_kb(" 0 kB"), Some(0));
        assert_eq!(parse_kb(""), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn pressure_sample_is_available_on_linux() {
        let pressure = writeback_pressure().expect("meminfo should parse");
        // Values are unbounded; only the unit conversion is checkable.
        assert_eq!(pressure.dirty_bytes % 1024, 0);
        assert_eq!(pressure.writeback_bytes % 1024, 0);
    }

    #[test]
    fn flush_hint_accepts_a_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::create(dir.path().join("f")).unwrap();
        // Some filesystems reject sync_file_range (EINVAL); both outcomes
        // are acceptable, the call just must not block or panic.
        let _ = flush_hint(&file);
    }
}
