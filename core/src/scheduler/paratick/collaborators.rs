//! Collaborator contracts the dynamic-tick engine consumes.
//!
//! Everything here is deliberately a function pointer, not a direct call:
//! the wall-clock subsystem, the software timer wheel, RCU, the soft-lockup
//! watchdog, process accounting and the tick hardware itself all live
//! outside this module (the timer driver lives in a crate that `core`
//! cannot depend on without inverting the `drivers -> core` direction).
//! The `boot` crate registers a concrete [`ParatickServices`] once at early
//! boot, the same way it registers [`crate::platform::PlatformServices`].
//! Tests register a mock table instead.

use core::ffi::c_void;

slopos_lib::define_service! {
    paratick => ParatickServices {
        // -- Clock & wall-clock subsystem -----------------------------------
        monotonic_now() -> u64;
        jiffies() -> u64;
        last_jiffies_update() -> u64;
        tick_do_update_jiffies64(now: u64);
        timer_clear_idle();

        // -- Deadline sources queried by the oracle --------------------------
        get_next_timer_interrupt(base_jiffies: u64, base_mono: u64) -> u64;
        timekeeping_max_deferment() -> u64;
        rcu_needs_cpu(base: u64) -> (bool, u64);
        arch_needs_cpu() -> bool;
        irq_work_needs_cpu() -> bool;
        local_timer_softirq_pending() -> bool;
        local_softirq_pending_nonzero() -> bool;

        // -- Per-tick work ----------------------------------------------------
        rcu_sched_clock_irq();
        irq_work_tick();
        run_local_timers();
        run_posix_cpu_timers_enabled() -> bool;
        run_posix_cpu_timers();
        scheduler_tick();
        profile_tick();
        account_process_tick(task: *mut c_void, user: bool);
        touch_softlockup_watchdog_sched();
        rng_stir();

        // -- Idle / load-balancer signalling -----------------------------------
        nohz_balance_enter_idle(cpu: u32);
        sched_clock_idle_sleep_event();
        sched_clock_idle_wakeup_event();

        // -- Timer hardware (owned by the drivers crate) -----------------------
        timer_arm(vector: u8, delta_ns: u64) -> bool;
        timer_cancel(vector: u8);
    }
}
