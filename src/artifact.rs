//! Tracked artifacts: the files whose small-to-large rewrite is raced
//! against in-flight writeback.
//!
//! Artifacts are created with a compact payload that filesystems with an
//! inline-data or tail-packing layout keep inside metadata, then expanded
//! past that threshold to force a layout conversion while writeback still
//! believes the old layout is current.

use std::cell::UnsafeCell;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::ops::Range;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::debug;

/// Compact payload size. ~90% of the ext4 inline-data threshold for
/// 256-byte inodes, the sweet spot for keeping data inline.
pub const COMPACT_LEN: usize = 140;

/// Expanded payload size. Past the inline threshold, forces conversion.
pub const EXPANDED_LEN: usize = 200;

static COMPACT_PAYLOAD: [u8; COMPACT_LEN] = [b'A'; COMPACT_LEN];
static EXPANDED_PAYLOAD: [u8; EXPANDED_LEN] = [b'B'; EXPANDED_LEN];

/// Content class of a tracked artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    /// Small enough to live in the inline/packed layout.
    Compact,
    /// Past the threshold; stored in the converted layout.
    Expanded,
}

/// One artifact slot: a path plus the descriptor held open across phases.
///
/// The descriptor stays open from creation until cleanup so racers can
/// mutate through it while writeback is in flight. The content class is
/// atomic because the expanding mutation goes through `&self`.
pub struct ArtifactSlot {
    path: PathBuf,
    file: Option<File>,
    class: AtomicU8,
}

const CLASS_COMPACT: u8 = 0;
const CLASS_EXPANDED: u8 = 1;

impl ArtifactSlot {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            class: AtomicU8::new(CLASS_COMPACT),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> Option<&File> {
        self.file.as_ref()
    }

    pub fn class(&self) -> ContentClass {
        match self.class.load(Ordering::Acquire) {
            CLASS_EXPANDED => ContentClass::Expanded,
            _ => ContentClass::Compact,
        }
    }

    /// Create (or truncate) the file and write the compact payload,
    /// retaining the descriptor.
    pub fn create_compact(&mut self) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(&COMPACT_PAYLOAD)?;
        self.file = Some(file);
        self.class.store(CLASS_COMPACT, Ordering::Release);
        Ok(())
    }

    /// Drop the held descriptor and reopen the existing file for writing.
    ///
    /// The continuous-contention churn loop uses this so the expanding
    /// writer is a different opener than the creator, as a second process
    /// racing the flush would be.
    pub fn reopen(&mut self) -> io::Result<()> {
        self.file = None;
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.file = Some(file);
        Ok(())
    }

    /// Truncate to empty and rewrite the expanded payload at offset 0.
    ///
    /// This is the racing mutation. It goes through a shared `&File` so the
    /// owning racer never needs exclusive access to the slot itself.
    pub fn expand(&self) -> io::Result<()> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "artifact was never created"))?;
        file.set_len(0)?;
        file.write_all_at(&EXPANDED_PAYLOAD, 0)?;
        self.class.store(CLASS_EXPANDED, Ordering::Release);
        Ok(())
    }

    /// Close the descriptor and unlink the path. Idempotent: a slot that
    /// was never created, or whose file is already gone, is not an error.
    pub fn discard(&mut self) -> io::Result<()> {
        self.file = None;
        self.class.store(CLASS_COMPACT, Ordering::Release);
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// The shared artifact table.
///
/// The table itself takes no locks. Exactly one role mutates it per phase:
/// the producer during PRODUCE and CLEANUP (slot creation and teardown), a
/// single owning racer per slot during RACE (through `&File`, see
/// [`ArtifactSlot::expand`]), and the coordinator reads descriptors during
/// TRIGGER. The phase machine plus the disjoint work assignments make those
/// accesses exclusive by construction; the accessors below are `unsafe`
/// because the compiler cannot see that schedule.
pub struct ArtifactTable {
    slots: UnsafeCell<Box<[ArtifactSlot]>>,
    len: usize,
}

// Exclusivity is provided by the phase machine, not by the type system.
unsafe impl Send for ArtifactTable {}
unsafe impl Sync for ArtifactTable {}

impl ArtifactTable {
    /// Allocate a table of `count` slots named `f0..fN` under `dir`.
    pub fn new(dir: &Path, count: usize) -> Self {
        Self::new_prefixed(dir, count, "")
    }

    /// Allocate a table whose file names carry `prefix`, keeping several
    /// tables in one directory disjoint.
    pub fn new_prefixed(dir: &Path, count: usize, prefix: &str) -> Self {
        let slots: Vec<ArtifactSlot> = (0..count)
            .map(|i| ArtifactSlot::new(dir.join(format!("{prefix}f{i}"))))
            .collect();
        Self {
            slots: UnsafeCell::new(slots.into_boxed_slice()),
            len: count,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Shared view of the slots.
    ///
    /// # Safety
    ///
    /// The caller must hold a phase in which no other role mutates the
    /// table: TRIGGER (coordinator) or RACE (racers over disjoint ranges).
    pub unsafe fn slots(&self) -> &[ArtifactSlot] {
        unsafe { &*self.slots.get() }
    }

    /// Exclusive view of the slots.
    ///
    /// # Safety
    ///
    /// The caller must be the sole role touching the table for the current
    /// phase (producer during PRODUCE/CLEANUP).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slots_mut(&self) -> &mut [ArtifactSlot] {
        unsafe { &mut *self.slots.get() }
    }

    /// Create the full compact batch. Per-slot failures are logged and
    /// skipped; the cycle proceeds with a smaller effective batch.
    ///
    /// # Safety
    ///
    /// Producer-only; see [`ArtifactTable::slots_mut`].
    pub unsafe fn produce(&self) -> usize {
        let mut created = 0;
        for slot in unsafe { self.slots_mut() } {
            match slot.create_compact() {
                Ok(()) => created += 1,
                Err(e) => debug!(path = %slot.path().display(), error = %e, "skipping artifact"),
            }
        }
        created
    }

    /// Close and unlink every slot. Idempotent; failures are logged and do
    /// not stop the sweep.
    ///
    /// # Safety
    ///
    /// Producer-only; see [`ArtifactTable::slots_mut`].
    pub unsafe fn cleanup(&self) {
        for slot in unsafe { self.slots_mut() } {
            if let Err(e) = slot.discard() {
                debug!(path = %slot.path().display(), error = %e, "cleanup failed");
            }
        }
    }
}

/// Contiguous work assignment for racer `id` of `racers` over `total`
/// artifacts.
///
/// Later partitions absorb the remainder, so the union over all ids covers
/// `[0, total)` exactly once with no gaps or overlap.
pub fn assignment(total: usize, racers: usize, id: usize) -> Range<usize> {
    debug_assert!(racers > 0 && id < racers);
    let start = id * total / racers;
    let end = (id + 1) * total / racers;
    start..end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_matches_documented_example() {
        assert_eq!(assignment(10, 3, 0), 0..3);
        assert_eq!(assignment(10, 3, 1), 3..6);
        assert_eq!(assignment(10, 3, 2), 6..10);
    }

    #[test]
    fn create_expand_discard_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut slot = ArtifactSlot::new(dir.path().join("f0"));

        slot.create_compact().unwrap();
        assert_eq!(fs::metadata(slot.path()).unwrap().len(), COMPACT_LEN as u64);
        assert_eq!(slot.class(), ContentClass::Compact);

        slot.expand().unwrap();
        assert_eq!(fs::metadata(slot.path()).unwrap().len(), EXPANDED_LEN as u64);
        assert_eq!(slot.class(), ContentClass::Expanded);

        slot.discard().unwrap();
        assert!(!slot.path().exists());
        // Second discard is a no-op, not an error.
        slot.discard().unwrap();
    }

    #[test]
    fn expand_without_create_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let slot = ArtifactSlot::new(dir.path().join("f0"));
        assert!(slot.expand().is_err());
    }

    #[test]
    fn table_produce_and_double_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let table = ArtifactTable::new(dir.path(), 8);

        let created = unsafe { table.produce() };
        assert_eq!(created, 8);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 8);

        unsafe { table.cleanup() };
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        // Cleanup of an already-empty table must be silent.
        unsafe { table.cleanup() };
    }
}
