//! Process-wide election of the CPU responsible for advancing wall-clock
//! state.
//!
//! A single relaxed atomic is enough: races are tolerated by design. A
//! stale `NONE` read just means the next non-idle tick on some CPU
//! re-elects itself; a stale CPU-id read is harmless because both the
//! oracle and the tick body re-validate ownership before acting on it.

use core::sync::atomic::{AtomicU32, Ordering};

/// Sentinel meaning "no CPU currently owns timekeeping".
pub const NONE: u32 = u32::MAX;

static TIMEKEEPER_CPU: AtomicU32 = AtomicU32::new(NONE);

/// Current timekeeper, or `None` if unowned.
pub fn current() -> Option<u32> {
    match TIMEKEEPER_CPU.load(Ordering::Relaxed) {
        NONE => None,
        cpu => Some(cpu),
    }
}

/// Whether the calling CPU currently holds timekeeping.
pub fn is_local_cpu_timekeeper() -> bool {
    current() == Some(slopos_lib::get_current_cpu() as u32)
}

/// Elect `cpu` as timekeeper if the role is currently unowned.
///
/// Called from the tick body on a non-idle CPU. Does nothing if another
/// CPU already holds the role (first one through wins; races are benign).
pub fn elect(cpu: u32) {
    let _ = TIMEKEEPER_CPU.compare_exchange(NONE, cpu, Ordering::Relaxed, Ordering::Relaxed);
}

/// Relinquish timekeeping if `cpu` currently holds it.
///
/// Called when `cpu` enters idle. A CAS rather than an unconditional store
/// so a CPU that never held the role can't accidentally clear another
/// CPU's ownership.
pub fn relinquish(cpu: u32) {
    let _ = TIMEKEEPER_CPU.compare_exchange(cpu, NONE, Ordering::Relaxed, Ordering::Relaxed);
}
