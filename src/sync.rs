//! Phase barrier and shared synchronization context.
//!
//! This module contains the state machine that drives burst cycles. All
//! worker roles rendezvous on a single [`BarrierState`] and observe the same
//! cancellation flag through [`SyncContext`].

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Iterations of `spin_loop` before a waiter falls back to napping.
const SPIN_BUDGET: u32 = 10_000;

/// Sleep length once the spin budget is exhausted. Waits stay in the
/// microsecond range; cancellation is observed within one nap.
const CONTENDED_NAP: Duration = Duration::from_micros(50);

/// One stage of the burst cycle.
///
/// The cycle is strictly `Produce → Trigger → Race → Cleanup → Produce`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Phase {
    /// Producer creates the compact artifact batch.
    Produce = 0,
    /// Coordinator starts non-blocking writeback over the batch.
    Trigger = 1,
    /// Racers expand artifacts while writeback is in flight.
    Race = 2,
    /// Producer closes and unlinks the batch.
    Cleanup = 3,
}

impl Phase {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Produce),
            1 => Some(Self::Trigger),
            2 => Some(Self::Race),
            3 => Some(Self::Cleanup),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Produce => "produce",
            Self::Trigger => "trigger",
            Self::Race => "race",
            Self::Cleanup => "cleanup",
        }
    }
}

/// Shared barrier state for one burst cycle.
///
/// `phase` and `ready_count` live in a single 64-bit word (phase in the high
/// half, ready count in the low half). A phase advance stores the whole word
/// at once, so the ready count is reset in the same atomic step that the
/// phase changes and no waiter can observe the new phase with a stale count.
///
/// There is deliberately no generation counter: a participant that sleeps
/// through an entire phase waits for a value that already passed and stays
/// parked until cancellation. See `wait_for`.
pub struct BarrierState {
    word: AtomicU64,
    cycle_count: AtomicU64,
}

const PHASE_SHIFT: u32 = 32;
const READY_MASK: u64 = u32::MAX as u64;

fn pack(phase: Phase, ready: u32) -> u64 {
    ((phase as u64) << PHASE_SHIFT) | u64::from(ready)
}

impl BarrierState {
    pub fn new() -> Self {
        Self {
            word: AtomicU64::new(pack(Phase::Produce, 0)),
            cycle_count: AtomicU64::new(0),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        let word = self.word.load(Ordering::Acquire);
        // The high half only ever holds values stored via `pack`.
        Phase::from_u32((word >> PHASE_SHIFT) as u32).expect("corrupt phase word")
    }

    /// Number of participants that have signalled for the pending boundary.
    pub fn ready_count(&self) -> u32 {
        (self.word.load(Ordering::Acquire) & READY_MASK) as u32
    }

    /// Completed burst cycles.
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count.load(Ordering::Acquire)
    }

    /// Record one completed cycle and return the new total.
    pub fn complete_cycle(&self) -> u64 {
        self.cycle_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Advance to `next` unconditionally, resetting the ready count.
    ///
    /// Used by a role that is the sole owner of a boundary (equivalent to
    /// `signal_and_wait` with an expected count of 1, without the increment).
    pub fn advance(&self, next: Phase) {
        self.word.store(pack(next, 0), Ordering::Release);
    }

    /// Signal readiness for the boundary into `next` and wait for it.
    ///
    /// Atomically increments the ready count. The participant whose
    /// increment makes the count equal `expected` becomes the transitioner:
    /// it advances the phase and resets the count in one store, then returns
    /// immediately. Every other participant waits until the phase observably
    /// equals `next`.
    ///
    /// Returns `false` if `cancel` was set while waiting, `true` otherwise.
    /// There is no timeout: a rendezvous that never completes blocks until
    /// cancellation.
    pub fn signal_and_wait(&self, next: Phase, expected: u32, cancel: &AtomicBool) -> bool {
        let prev = self.word.fetch_add(1, Ordering::AcqRel);
        let ready = (prev & READY_MASK) as u32 + 1;

        if ready == expected {
            self.advance(next);
            true
        } else {
            self.wait_for(next, cancel)
        }
    }

    /// Wait until the phase equals `want`.
    ///
    /// Busy-spins on a low-power hint first, then naps briefly so a stalled
    /// rendezvous does not burn a core forever. The cancellation flag is
    /// polled on every iteration. Returns `false` on cancellation.
    pub fn wait_for(&self, want: Phase, cancel: &AtomicBool) -> bool {
        let mut spins = 0u32;
        while self.phase() != want {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            if spins < SPIN_BUDGET {
                std::hint::spin_loop();
                spins += 1;
            } else {
                thread::sleep(CONTENDED_NAP);
            }
        }
        true
    }

    /// Wait until the phase is no longer `current`. Returns `false` on
    /// cancellation.
    pub fn wait_while(&self, current: Phase, cancel: &AtomicBool) -> bool {
        let mut spins = 0u32;
        while self.phase() == current {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            if spins < SPIN_BUDGET {
                std::hint::spin_loop();
                spins += 1;
            } else {
                thread::sleep(CONTENDED_NAP);
            }
        }
        true
    }
}

impl Default for BarrierState {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state passed by reference into every role's entry point.
///
/// Owns the barrier, the global cancellation flag and the cumulative
/// counters sampled by the monitor. There are no process-wide singletons;
/// everything a role needs to coordinate lives here.
pub struct SyncContext {
    barrier: BarrierState,
    cancel: AtomicBool,
    /// Racers actually started, published before the first cycle. The
    /// RACE→CLEANUP rendezvous counts against this rather than the
    /// configured pool size so a failed spawn degrades instead of stalling.
    racer_quorum: AtomicU32,
    operations: AtomicU64,
    operation_failures: AtomicU64,
}

impl SyncContext {
    pub fn new() -> Self {
        Self {
            barrier: BarrierState::new(),
            cancel: AtomicBool::new(false),
            racer_quorum: AtomicU32::new(0),
            operations: AtomicU64::new(0),
            operation_failures: AtomicU64::new(0),
        }
    }

    pub fn barrier(&self) -> &BarrierState {
        &self.barrier
    }

    /// Request that every role unwind at its next poll point.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Convenience wrappers that thread the shared cancellation flag.
    pub fn signal_and_wait(&self, next: Phase, expected: u32) -> bool {
        self.barrier.signal_and_wait(next, expected, &self.cancel)
    }

    pub fn wait_for(&self, want: Phase) -> bool {
        self.barrier.wait_for(want, &self.cancel)
    }

    pub fn wait_while(&self, current: Phase) -> bool {
        self.barrier.wait_while(current, &self.cancel)
    }

    pub fn set_racer_quorum(&self, quorum: u32) {
        self.racer_quorum.store(quorum, Ordering::Release);
    }

    pub fn racer_quorum(&self) -> u32 {
        self.racer_quorum.load(Ordering::Acquire)
    }

    pub fn add_operations(&self, n: u64) {
        self.operations.fetch_add(n, Ordering::Relaxed);
    }

    pub fn operations(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    pub fn add_operation_failures(&self, n: u64) {
        self.operation_failures.fetch_add(n, Ordering::Relaxed);
    }

    pub fn operation_failures(&self) -> u64 {
        self.operation_failures.load(Ordering::Relaxed)
    }

    /// Sleep for `duration`, waking early if cancelled. Returns `false` if
    /// cancellation was observed.
    pub fn nap(&self, duration: Duration) -> bool {
        const POLL: Duration = Duration::from_millis(20);
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.is_cancelled() {
                return false;
            }
            let step = remaining.min(POLL);
            thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
        !self.is_cancelled()
    }
}

impl Default for SyncContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_roundtrips_through_discriminant() {
        for phase in [Phase::Produce, Phase::Trigger, Phase::Race, Phase::Cleanup] {
            assert_eq!(Phase::from_u32(phase as u32), Some(phase));
        }
        assert_eq!(Phase::from_u32(4), None);
    }

    #[test]
    fn transitioner_advances_and_resets() {
        let barrier = BarrierState::new();
        let cancel = AtomicBool::new(false);

        // Single-participant boundary: the first signal transitions.
        assert!(barrier.signal_and_wait(Phase::Trigger, 1, &cancel));
        assert_eq!(barrier.phase(), Phase::Trigger);
        assert_eq!(barrier.ready_count(), 0);
    }

    #[test]
    fn non_transitioner_observes_reset_count() {
        let barrier = BarrierState::new();
        let cancel = AtomicBool::new(false);

        // First of two participants: increments but must not advance.
        let prev = barrier.word.fetch_add(1, Ordering::AcqRel);
        assert_eq!(prev & READY_MASK, 0);
        assert_eq!(barrier.phase(), Phase::Produce);
        assert_eq!(barrier.ready_count(), 1);

        // Second participant completes the rendezvous.
        assert!(barrier.signal_and_wait(Phase::Trigger, 2, &cancel));
        assert_eq!(barrier.phase(), Phase::Trigger);
        assert_eq!(barrier.ready_count(), 0);
    }

    #[test]
    fn cancellation_unblocks_waiter() {
        let barrier = std::sync::Arc::new(BarrierState::new());
        let cancel = std::sync::Arc::new(AtomicBool::new(false));

        let waiter = {
            let barrier = barrier.clone();
            let cancel = cancel.clone();
            thread::spawn(move || barrier.wait_for(Phase::Race, &cancel))
        };

        thread::sleep(Duration::from_millis(50));
        cancel.store(true, Ordering::SeqCst);
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn nap_returns_early_on_cancel() {
        let ctx = std::sync::Arc::new(SyncContext::new());
        let sleeper = {
            let ctx = ctx.clone();
            thread::spawn(move || ctx.nap(Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(50));
        ctx.cancel();
        assert!(!sleeper.join().unwrap());
    }
}
