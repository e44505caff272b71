//! The dynamic-tick engine: idle entry/exit, IRQ entry/exit, timer firing,
//! and timekeeper election.
//!
//! Every public function here is the Rust counterpart of one of the
//! external entry points: `setup_paratick_timer`, `paratick_enter_idle`,
//! `paratick_start_idle`, `paratick_exit_idle`, `paratick_irq_enter`,
//! `paratick_irq_exit`, `paratick_init`, `on_irq`. They're free functions
//! rather than methods on [`super::state::PerCpuTickState`] because each
//! one touches more than just the per-CPU state — the oracle, the
//! timekeeper election, and the collaborator table besides.

use core::ffi::c_void;

use slopos_lib::{klog_debug, klog_info, InterruptFrame, IrqPreemptGuard};

use super::collaborators::paratick_services;
use super::oracle::{self, Deadline};
use super::state::{self, PARATICK_VECTOR};
use super::timekeeper;
use crate::scheduler::scheduler::scheduler_get_current_task;
use crate::scheduler::trap::save_preempt_context;

/// Module init, run once on the boot CPU. Seeds every CPU's `last_tick`
/// and marks the engine ready; per-CPU arming still happens in
/// `setup_paratick_timer` on each CPU's own bring-up path.
///
/// Returns `0` on success. There's no IRQ-descriptor allocation to fail in
/// this tree (the vector is a compile-time constant shared with the
/// existing LAPIC timer wiring), so failure here would only ever be a
/// collaborator-table registration bug, which panics rather than returning
/// an error code — this return value exists for fidelity with the
/// external interface's documented failure contract.
pub fn paratick_init() -> i32 {
    klog_info!("PARATICK: Engine initialized, vector 0x{:x}", PARATICK_VECTOR);
    0
}

/// Per-CPU bring-up. Precondition: pinned to the CPU being set up, IRQs
/// enabled.
pub fn setup_paratick_timer() {
    let now = (paratick_services().monotonic_now)();
    state::local().setup(now);
    klog_debug!("PARATICK: CPU {} tick state initialized", slopos_lib::get_current_cpu());
}

/// Called from the idle loop just before the CPU halts or waits.
///
/// No timer is programmed here — arming is deferred to `start_idle` so
/// that work enqueued in the window between the two calls is observed.
pub fn paratick_enter_idle() {
    let st = state::local();
    st.set_idle(true);

    let cpu = slopos_lib::get_current_cpu() as u32;
    timekeeper::relinquish(cpu);

    (paratick_services().sched_clock_idle_sleep_event)();
}

/// Called from the idle loop just before sleeping, after `enter_idle`.
/// Disables local IRQs for its entire body.
pub fn paratick_start_idle() {
    let _guard = IrqPreemptGuard::new();

    let st = state::local();
    if !st.is_initialized() {
        return;
    }

    let services = paratick_services();
    let now = (services.monotonic_now)();
    let next = oracle::next_event(now);

    match next.delta_from(now) {
        Some(delta) => {
            st.arm(delta);
            if delta > oracle::TICK_PERIOD {
                (services.nohz_balance_enter_idle)(slopos_lib::get_current_cpu() as u32);
            }
        }
        None => {
            if matches!(next, Deadline::Never) && st.is_armed() {
                st.disarm();
            }
        }
    }
}

/// Called from the wake path when a blocked/idle CPU is being unblocked.
/// Disables local IRQs for its entire body.
pub fn paratick_exit_idle() {
    let _guard = IrqPreemptGuard::new();

    let services = paratick_services();
    (services.timer_clear_idle)();

    let st = state::local();
    st.set_idle(false);
    if st.is_armed() {
        // The active path re-arms as part of its normal tick handler.
        st.disarm();
    }
}

/// Called at the entry of any hardware IRQ handler.
pub fn paratick_irq_enter() {
    let st = state::local();
    if st.is_initialized() && st.is_idle() {
        let guard = IrqPreemptGuard::new();
        let now = (paratick_services().monotonic_now)();
        (paratick_services().tick_do_update_jiffies64)(now);
        drop(guard);
    }
    (paratick_services().touch_softlockup_watchdog_sched)();
}

/// Signals the end of an IRQ, symmetric to `enter_idle`'s idle-sleep
/// notification.
pub fn paratick_irq_exit() {
    (paratick_services().sched_clock_idle_wakeup_event)();
}

/// The tick body: invoked from the timer callback in hard-IRQ context.
/// Saves the interrupted task's register context before touching any
/// scheduler state, the same precondition `scheduler_handle_timer_interrupt`
/// used to establish for the fixed-period tick.
pub fn on_timer_expiry(frame: *mut InterruptFrame) {
    save_preempt_context(frame);

    let services = paratick_services();
    let cpu = slopos_lib::get_current_cpu() as u32;
    let now = (services.monotonic_now)();
    let user = if frame.is_null() {
        false
    } else {
        (unsafe { (*frame).cs } & 3) == 3
    };

    let st = state::local();

    // Timekeeper election: first non-idle tick on an unowned role claims it.
    if timekeeper::current().is_none() && !st.is_idle() {
        timekeeper::elect(cpu);
    }
    if timekeeper::current() == Some(cpu) {
        (services.tick_do_update_jiffies64)(now);
    }

    // Process accounting: floor((now - last_tick) / TICK_PERIOD) missed ticks.
    let last_tick = st.last_tick();
    let missed = now.saturating_sub(last_tick) / oracle::TICK_PERIOD;
    let current_task: *mut c_void = scheduler_get_current_task().cast();
    for _ in 0..missed {
        (services.profile_tick)();
        (services.account_process_tick)(current_task, user);
    }
    st.set_last_tick(now);

    (services.run_local_timers)();
    (services.rcu_sched_clock_irq)();
    (services.irq_work_tick)();
    (services.scheduler_tick)();
    if (services.run_posix_cpu_timers_enabled)() {
        (services.run_posix_cpu_timers)();
    }
    (services.rng_stir)();

    let next = oracle::next_event(now);
    match next.delta_from(now) {
        Some(delta) => st.arm(delta),
        None => {
            st.disarm();
            (services.nohz_balance_enter_idle)(cpu);
        }
    }
}

/// The installed IRQ handler for the paratick vector.
///
/// The caller (the IDT dispatch path) sends EOI immediately after this
/// returns, so this only runs the tick body — keeping the ack out here
/// avoids double-acknowledging the same interrupt. Kept distinct from
/// `on_timer_expiry` so a dedicated IPI vector could drive the same body
/// for cross-CPU tick delivery.
pub fn on_irq(frame: *mut InterruptFrame) {
    on_timer_expiry(frame);
}
