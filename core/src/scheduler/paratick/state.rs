//! Per-CPU tick state: the timer handle's software twin, the flag triple,
//! and the last-accounted timestamp.
//!
//! Storage is a `MAX_CPUS`-indexed static array, mirroring the
//! [`super::per_cpu::CPU_SCHEDULERS`](crate::scheduler::per_cpu) layout: one
//! process-wide array, one entry per CPU, no locks. The pinning contract
//! from the data model — only the owning CPU ever touches its entry, and
//! only with local IRQs disabled — is not enforced at runtime; it's a
//! precondition on every public function here, the same way
//! `PerCpuScheduler` trusts its caller to be on the right CPU.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use slopos_lib::MAX_CPUS;

use super::collaborators::paratick_services;

/// IDT vector the paratick timer fires on. Shared with the legacy
/// preemption tick; the LAPIC only has one timer per CPU to arm.
pub const PARATICK_VECTOR: u8 = slopos_lib::arch::idt::LAPIC_TIMER_VECTOR;

pub struct PerCpuTickState {
    initialized: AtomicBool,
    in_idle: AtomicBool,
    timer_armed: AtomicBool,
    last_tick: AtomicU64,
}

impl PerCpuTickState {
    const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            in_idle: AtomicBool::new(false),
            timer_armed: AtomicBool::new(false),
            last_tick: AtomicU64::new(0),
        }
    }

    /// Initialize this CPU's entry: install the tick-expiry callback
    /// (implicitly — the IDT vector is already routed to
    /// [`super::engine::on_irq`] for every CPU) and seed `last_tick` to
    /// the current monotonic time.
    ///
    /// Precondition: called once, on the CPU this entry belongs to.
    pub fn setup(&self, now: u64) {
        self.last_tick.store(now, Ordering::Relaxed);
        self.in_idle.store(false, Ordering::Relaxed);
        self.timer_armed.store(false, Ordering::Relaxed);
        self.initialized.store(true, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_idle(&self) -> bool {
        self.in_idle.load(Ordering::Relaxed)
    }

    pub fn set_idle(&self, idle: bool) {
        self.in_idle.store(idle, Ordering::Relaxed);
    }

    pub fn is_armed(&self) -> bool {
        self.timer_armed.load(Ordering::Relaxed)
    }

    pub fn last_tick(&self) -> u64 {
        self.last_tick.load(Ordering::Relaxed)
    }

    pub fn set_last_tick(&self, now: u64) {
        self.last_tick.store(now, Ordering::Relaxed);
    }

    /// Program the timer to fire `delta` nanoseconds from now (the LAPIC
    /// only counts down, so callers pass the already-relative delta rather
    /// than an absolute deadline). Cancels any prior expiry first; the
    /// caller is expected to hold local IRQs disabled for the duration so
    /// the cancel-then-forward sequence is atomic with respect to this CPU.
    pub fn arm(&self, delta: u64) {
        let services = paratick_services();
        (services.timer_cancel)(PARATICK_VECTOR);
        if (services.timer_arm)(PARATICK_VECTOR, delta) {
            self.timer_armed.store(true, Ordering::Relaxed);
        } else {
            // Programming the timer failed: wrong context or not pinned.
            // Not recoverable; leave `timer_armed` false so callers don't
            // believe a tick is coming that never will.
            self.timer_armed.store(false, Ordering::Relaxed);
        }
    }

    pub fn disarm(&self) {
        if self.timer_armed.swap(false, Ordering::Relaxed) {
            (paratick_services().timer_cancel)(PARATICK_VECTOR);
        }
    }
}

static STATES: [PerCpuTickState; MAX_CPUS] = {
    const INIT: PerCpuTickState = PerCpuTickState::new();
    [INIT; MAX_CPUS]
};

/// The calling CPU's tick state.
pub fn local() -> &'static PerCpuTickState {
    let cpu = slopos_lib::get_current_cpu();
    &STATES[cpu]
}

/// A specific CPU's tick state, for election/relinquish checks made from
/// a different CPU's context.
pub fn for_cpu(cpu: usize) -> Option<&'static PerCpuTickState> {
    STATES.get(cpu)
}
