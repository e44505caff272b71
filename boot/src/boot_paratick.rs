//! Concrete collaborator table for the dynamic-tick engine.
//!
//! Registered once during early boot, the same way [`crate::boot_impl`]
//! registers [`PlatformServices`](slopos_lib::kernel_services::platform::PlatformServices).
//! Several collaborators named in the engine's contract — RCU, the
//! software timer wheel, POSIX CPU timers — have no implementation
//! anywhere in this kernel; those are wired to conservative constants
//! (never veto, never a nearer deadline) rather than invented subsystems.

use core::ffi::c_void;

use slopos_core::scheduler::paratick::collaborators::{
    register_paratick_services, ParatickServices,
};
use slopos_core::scheduler::scheduler::scheduler_timer_tick;
use slopos_core::scheduler::task_struct::Task;
use slopos_drivers::{apic, hpet, random};

/// Upper bound on how long a non-timekeeper CPU may defer its tick before
/// wall-clock updates would stall for too long. No jiffies-overflow
/// calculation exists in this tree to derive this from first principles,
/// so it's a flat, generous bound well under any realistic timer-wheel
/// deadline.
const MAX_DEFERMENT_NS: u64 = 100_000_000;

fn monotonic_now_fn() -> u64 {
    hpet::nanoseconds(hpet::read_counter())
}

fn jiffies_fn() -> u64 {
    slopos_core::irq::get_timer_ticks()
}

fn last_jiffies_update_fn() -> u64 {
    monotonic_now_fn()
}

fn tick_do_update_jiffies64_fn(_now: u64) {
    slopos_core::irq::increment_timer_ticks();
}

fn timer_clear_idle_fn() {}

fn get_next_timer_interrupt_fn(_base_jiffies: u64, _base_mono: u64) -> u64 {
    // No software timer wheel exists in this tree; nothing is ever nearer
    // than the RCU deadline, so defer entirely to it.
    u64::MAX
}

fn timekeeping_max_deferment_fn() -> u64 {
    MAX_DEFERMENT_NS
}

fn rcu_needs_cpu_fn(_base: u64) -> (bool, u64) {
    (false, u64::MAX)
}

fn arch_needs_cpu_fn() -> bool {
    false
}

fn irq_work_needs_cpu_fn() -> bool {
    false
}

fn local_timer_softirq_pending_fn() -> bool {
    false
}

fn local_softirq_pending_nonzero_fn() -> bool {
    false
}

fn rcu_sched_clock_irq_fn() {}

fn irq_work_tick_fn() {}

fn run_local_timers_fn() {}

fn run_posix_cpu_timers_enabled_fn() -> bool {
    false
}

fn run_posix_cpu_timers_fn() {}

fn scheduler_tick_fn() {
    scheduler_timer_tick();
}

fn profile_tick_fn() {}

fn account_process_tick_fn(task: *mut c_void, _user: bool) {
    if task.is_null() {
        return;
    }
    unsafe { (*task.cast::<Task>()).total_runtime += 1 };
}

fn touch_softlockup_watchdog_sched_fn() {}

fn rng_stir_fn() {
    // Legacy side effect, preserved for behavioral equivalence: every tick
    // perturbs the RNG word regardless of whether anything consumes it.
    let _ = random::random_next();
}

fn nohz_balance_enter_idle_fn(cpu: u32) {
    slopos_core::scheduler::per_cpu::with_cpu_scheduler(cpu as usize, |sched| {
        sched.increment_idle_time();
    });
}

fn sched_clock_idle_sleep_event_fn() {}

fn sched_clock_idle_wakeup_event_fn() {}

fn timer_arm_fn(vector: u8, delta_ns: u64) -> bool {
    apic::timer::arm_oneshot_ns(vector, delta_ns)
}

fn timer_cancel_fn(vector: u8) {
    apic::timer::cancel(vector);
}

static PARATICK_SERVICES: ParatickServices = ParatickServices {
    monotonic_now: monotonic_now_fn,
    jiffies: jiffies_fn,
    last_jiffies_update: last_jiffies_update_fn,
    tick_do_update_jiffies64: tick_do_update_jiffies64_fn,
    timer_clear_idle: timer_clear_idle_fn,
    get_next_timer_interrupt: get_next_timer_interrupt_fn,
    timekeeping_max_deferment: timekeeping_max_deferment_fn,
    rcu_needs_cpu: rcu_needs_cpu_fn,
    arch_needs_cpu: arch_needs_cpu_fn,
    irq_work_needs_cpu: irq_work_needs_cpu_fn,
    local_timer_softirq_pending: local_timer_softirq_pending_fn,
    local_softirq_pending_nonzero: local_softirq_pending_nonzero_fn,
    rcu_sched_clock_irq: rcu_sched_clock_irq_fn,
    irq_work_tick: irq_work_tick_fn,
    run_local_timers: run_local_timers_fn,
    run_posix_cpu_timers_enabled: run_posix_cpu_timers_enabled_fn,
    run_posix_cpu_timers: run_posix_cpu_timers_fn,
    scheduler_tick: scheduler_tick_fn,
    profile_tick: profile_tick_fn,
    account_process_tick: account_process_tick_fn,
    touch_softlockup_watchdog_sched: touch_softlockup_watchdog_sched_fn,
    rng_stir: rng_stir_fn,
    nohz_balance_enter_idle: nohz_balance_enter_idle_fn,
    sched_clock_idle_sleep_event: sched_clock_idle_sleep_event_fn,
    sched_clock_idle_wakeup_event: sched_clock_idle_wakeup_event_fn,
    timer_arm: timer_arm_fn,
    timer_cancel: timer_cancel_fn,
};

pub fn register_paratick_boot_services() {
    register_paratick_services(&PARATICK_SERVICES);
}
