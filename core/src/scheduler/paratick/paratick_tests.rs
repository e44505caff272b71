//! Tests for the dynamic-tick engine: the testable properties and literal
//! scenarios the design calls out, run against a simulated clock and a
//! mocked collaborator table instead of real hardware.

use core::ffi::c_void;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use slopos_lib::testing::TestResult;
use slopos_lib::{assert_eq_test, assert_test};

use super::collaborators::{register_paratick_services, ParatickServices};
use super::engine;
use super::oracle::{self, Deadline};
use super::state;
use super::timekeeper;

mod mock {
    use super::*;

    pub static CLOCK: AtomicU64 = AtomicU64::new(1_000_000_000);
    pub static JIFFIES: AtomicU64 = AtomicU64::new(0);
    pub static LAST_JIFFIES_UPDATE: AtomicU64 = AtomicU64::new(0);
    pub static NEXT_TMR_NS: AtomicU64 = AtomicU64::new(u64::MAX);
    pub static NEXT_RCU_NS: AtomicU64 = AtomicU64::new(u64::MAX);
    pub static MAX_DEFERMENT: AtomicU64 = AtomicU64::new(u64::MAX);

    pub static RCU_VETO: AtomicBool = AtomicBool::new(false);
    pub static ARCH_VETO: AtomicBool = AtomicBool::new(false);
    pub static IRQ_WORK_VETO: AtomicBool = AtomicBool::new(false);
    pub static LOCAL_TIMER_SOFTIRQ_PENDING: AtomicBool = AtomicBool::new(false);
    pub static LOCAL_SOFTIRQ_PENDING_NONZERO: AtomicBool = AtomicBool::new(false);
    pub static POSIX_TIMERS_ENABLED: AtomicBool = AtomicBool::new(false);

    pub static TIMER_CLEAR_IDLE_CALLS: AtomicU32 = AtomicU32::new(0);
    pub static TICK_DO_UPDATE_JIFFIES_CALLS: AtomicU32 = AtomicU32::new(0);
    pub static PROFILE_TICK_CALLS: AtomicU32 = AtomicU32::new(0);
    pub static ACCOUNT_PROCESS_TICK_CALLS: AtomicU32 = AtomicU32::new(0);
    pub static NOHZ_BALANCE_ENTER_IDLE_CALLS: AtomicU32 = AtomicU32::new(0);
    pub static TIMER_ARM_CALLS: AtomicU32 = AtomicU32::new(0);
    pub static TIMER_ARM_LAST_DELTA: AtomicU64 = AtomicU64::new(0);
    pub static TIMER_CANCEL_CALLS: AtomicU32 = AtomicU32::new(0);

    pub fn reset() {
        CLOCK.store(1_000_000_000, Ordering::Relaxed);
        JIFFIES.store(0, Ordering::Relaxed);
        LAST_JIFFIES_UPDATE.store(0, Ordering::Relaxed);
        NEXT_TMR_NS.store(u64::MAX, Ordering::Relaxed);
        NEXT_RCU_NS.store(u64::MAX, Ordering::Relaxed);
        MAX_DEFERMENT.store(u64::MAX, Ordering::Relaxed);
        RCU_VETO.store(false, Ordering::Relaxed);
        ARCH_VETO.store(false, Ordering::Relaxed);
        IRQ_WORK_VETO.store(false, Ordering::Relaxed);
        LOCAL_TIMER_SOFTIRQ_PENDING.store(false, Ordering::Relaxed);
        LOCAL_SOFTIRQ_PENDING_NONZERO.store(false, Ordering::Relaxed);
        POSIX_TIMERS_ENABLED.store(false, Ordering::Relaxed);
        TIMER_CLEAR_IDLE_CALLS.store(0, Ordering::Relaxed);
        TICK_DO_UPDATE_JIFFIES_CALLS.store(0, Ordering::Relaxed);
        PROFILE_TICK_CALLS.store(0, Ordering::Relaxed);
        ACCOUNT_PROCESS_TICK_CALLS.store(0, Ordering::Relaxed);
        NOHZ_BALANCE_ENTER_IDLE_CALLS.store(0, Ordering::Relaxed);
        TIMER_ARM_CALLS.store(0, Ordering::Relaxed);
        TIMER_ARM_LAST_DELTA.store(0, Ordering::Relaxed);
        TIMER_CANCEL_CALLS.store(0, Ordering::Relaxed);
    }

    pub fn now() -> u64 {
        CLOCK.load(Ordering::Relaxed)
    }

    pub fn set_clock(ns: u64) {
        CLOCK.store(ns, Ordering::Relaxed);
    }

    fn m_monotonic_now() -> u64 {
        CLOCK.load(Ordering::Relaxed)
    }
    fn m_jiffies() -> u64 {
        JIFFIES.load(Ordering::Relaxed)
    }
    fn m_last_jiffies_update() -> u64 {
        LAST_JIFFIES_UPDATE.load(Ordering::Relaxed)
    }
    fn m_tick_do_update_jiffies64(_now: u64) {
        TICK_DO_UPDATE_JIFFIES_CALLS.fetch_add(1, Ordering::Relaxed);
    }
    fn m_timer_clear_idle() {
        TIMER_CLEAR_IDLE_CALLS.fetch_add(1, Ordering::Relaxed);
    }
    fn m_get_next_timer_interrupt(_base_jiffies: u64, _base_mono: u64) -> u64 {
        NEXT_TMR_NS.load(Ordering::Relaxed)
    }
    fn m_timekeeping_max_deferment() -> u64 {
        MAX_DEFERMENT.load(Ordering::Relaxed)
    }
    fn m_rcu_needs_cpu(_base: u64) -> (bool, u64) {
        (RCU_VETO.load(Ordering::Relaxed), NEXT_RCU_NS.load(Ordering::Relaxed))
    }
    fn m_arch_needs_cpu() -> bool {
        ARCH_VETO.load(Ordering::Relaxed)
    }
    fn m_irq_work_needs_cpu() -> bool {
        IRQ_WORK_VETO.load(Ordering::Relaxed)
    }
    fn m_local_timer_softirq_pending() -> bool {
        LOCAL_TIMER_SOFTIRQ_PENDING.load(Ordering::Relaxed)
    }
    fn m_local_softirq_pending_nonzero() -> bool {
        LOCAL_SOFTIRQ_PENDING_NONZERO.load(Ordering::Relaxed)
    }
    fn m_rcu_sched_clock_irq() {}
    fn m_irq_work_tick() {}
    fn m_run_local_timers() {}
    fn m_run_posix_cpu_timers_enabled() -> bool {
        POSIX_TIMERS_ENABLED.load(Ordering::Relaxed)
    }
    fn m_run_posix_cpu_timers() {}
    fn m_scheduler_tick() {}
    fn m_profile_tick() {
        PROFILE_TICK_CALLS.fetch_add(1, Ordering::Relaxed);
    }
    fn m_account_process_tick(_task: *mut c_void, _user: bool) {
        ACCOUNT_PROCESS_TICK_CALLS.fetch_add(1, Ordering::Relaxed);
    }
    fn m_touch_softlockup_watchdog_sched() {}
    fn m_rng_stir() {}
    fn m_nohz_balance_enter_idle(_cpu: u32) {
        NOHZ_BALANCE_ENTER_IDLE_CALLS.fetch_add(1, Ordering::Relaxed);
    }
    fn m_sched_clock_idle_sleep_event() {}
    fn m_sched_clock_idle_wakeup_event() {}
    fn m_timer_arm(_vector: u8, delta_ns: u64) -> bool {
        TIMER_ARM_CALLS.fetch_add(1, Ordering::Relaxed);
        TIMER_ARM_LAST_DELTA.store(delta_ns, Ordering::Relaxed);
        true
    }
    fn m_timer_cancel(_vector: u8) {
        TIMER_CANCEL_CALLS.fetch_add(1, Ordering::Relaxed);
    }

    static MOCK_SERVICES: ParatickServices = ParatickServices {
        monotonic_now: m_monotonic_now,
        jiffies: m_jiffies,
        last_jiffies_update: m_last_jiffies_update,
        tick_do_update_jiffies64: m_tick_do_update_jiffies64,
        timer_clear_idle: m_timer_clear_idle,
        get_next_timer_interrupt: m_get_next_timer_interrupt,
        timekeeping_max_deferment: m_timekeeping_max_deferment,
        rcu_needs_cpu: m_rcu_needs_cpu,
        arch_needs_cpu: m_arch_needs_cpu,
        irq_work_needs_cpu: m_irq_work_needs_cpu,
        local_timer_softirq_pending: m_local_timer_softirq_pending,
        local_softirq_pending_nonzero: m_local_softirq_pending_nonzero,
        rcu_sched_clock_irq: m_rcu_sched_clock_irq,
        irq_work_tick: m_irq_work_tick,
        run_local_timers: m_run_local_timers,
        run_posix_cpu_timers_enabled: m_run_posix_cpu_timers_enabled,
        run_posix_cpu_timers: m_run_posix_cpu_timers,
        scheduler_tick: m_scheduler_tick,
        profile_tick: m_profile_tick,
        account_process_tick: m_account_process_tick,
        touch_softlockup_watchdog_sched: m_touch_softlockup_watchdog_sched,
        rng_stir: m_rng_stir,
        nohz_balance_enter_idle: m_nohz_balance_enter_idle,
        sched_clock_idle_sleep_event: m_sched_clock_idle_sleep_event,
        sched_clock_idle_wakeup_event: m_sched_clock_idle_wakeup_event,
        timer_arm: m_timer_arm,
        timer_cancel: m_timer_cancel,
    };

    pub fn install() {
        register_paratick_services(&MOCK_SERVICES);
        reset();
    }
}

/// RAII fixture: installs the mock collaborator table and resets counters
/// on creation, and leaves the mock state clean on drop so a differently
/// ordered test run still starts from a known baseline.
struct ParatickFixture;

impl ParatickFixture {
    fn new() -> Self {
        mock::install();
        // Force the role back to unowned regardless of which CPU (if any)
        // a prior test left it assigned to.
        while let Some(cpu) = timekeeper::current() {
            timekeeper::relinquish(cpu);
        }
        engine::setup_paratick_timer();
        Self
    }
}

impl Drop for ParatickFixture {
    fn drop(&mut self) {
        mock::reset();
    }
}

// ---------------------------------------------------------------------------
// P1. Monotone last_tick
// ---------------------------------------------------------------------------

pub fn test_p1_last_tick_monotone() -> TestResult {
    let _fx = ParatickFixture::new();

    let t0 = mock::now();
    engine::on_timer_expiry(core::ptr::null_mut());
    let after_first = state::local().last_tick();
    assert_eq_test!(after_first, t0);

    mock::set_clock(t0 + 9_000_000);
    engine::on_timer_expiry(core::ptr::null_mut());
    let after_second = state::local().last_tick();
    assert_test!(after_second >= after_first, "last_tick must not regress");
    assert_eq_test!(after_second, t0 + 9_000_000);
    TestResult::Pass
}

// ---------------------------------------------------------------------------
// P2. Exact accounting
// ---------------------------------------------------------------------------

pub fn test_p2_exact_accounting() -> TestResult {
    let _fx = ParatickFixture::new();

    let t0 = mock::now();
    engine::on_timer_expiry(core::ptr::null_mut()); // seeds last_tick = t0

    mock::set_clock(t0 + 10_000_000); // 2 full periods later
    mock::ACCOUNT_PROCESS_TICK_CALLS.store(0, Ordering::Relaxed);
    mock::PROFILE_TICK_CALLS.store(0, Ordering::Relaxed);
    engine::on_timer_expiry(core::ptr::null_mut());

    assert_eq_test!(mock::ACCOUNT_PROCESS_TICK_CALLS.load(Ordering::Relaxed), 2);
    assert_eq_test!(mock::PROFILE_TICK_CALLS.load(Ordering::Relaxed), 2);
    TestResult::Pass
}

// ---------------------------------------------------------------------------
// P3. Veto dominance
// ---------------------------------------------------------------------------

pub fn test_p3_veto_dominance() -> TestResult {
    let _fx = ParatickFixture::new();

    mock::NEXT_TMR_NS.store(mock::now() + 1, Ordering::Relaxed);
    mock::NEXT_RCU_NS.store(mock::now() + 1, Ordering::Relaxed);
    mock::LOCAL_SOFTIRQ_PENDING_NONZERO.store(true, Ordering::Relaxed);

    let deadline = oracle::next_event(mock::now());
    assert_eq_test!(deadline, Deadline::TickPeriod);
    TestResult::Pass
}

// ---------------------------------------------------------------------------
// P4. Deferment clamp
// ---------------------------------------------------------------------------

pub fn test_p4_deferment_clamp() -> TestResult {
    let _fx = ParatickFixture::new();

    let now = mock::now();
    mock::NEXT_TMR_NS.store(now + 100_000_000, Ordering::Relaxed);
    mock::NEXT_RCU_NS.store(now + 200_000_000, Ordering::Relaxed);
    mock::MAX_DEFERMENT.store(60_000_000, Ordering::Relaxed);

    let deadline = oracle::next_event(now);
    assert_eq_test!(deadline, Deadline::Absolute(now + 60_000_000));
    TestResult::Pass
}

// ---------------------------------------------------------------------------
// P5. Single timekeeper
// ---------------------------------------------------------------------------

pub fn test_p5_single_timekeeper() -> TestResult {
    let _fx = ParatickFixture::new();

    assert_test!(timekeeper::current().is_none());
    timekeeper::elect(2);
    assert_eq_test!(timekeeper::current(), Some(2));

    // A second elect attempt from a different CPU must not steal the role.
    timekeeper::elect(5);
    assert_eq_test!(timekeeper::current(), Some(2));

    timekeeper::relinquish(2);
    assert_test!(timekeeper::current().is_none());
    TestResult::Pass
}

// ---------------------------------------------------------------------------
// P6. Idempotent idle entry
// ---------------------------------------------------------------------------

pub fn test_p6_idempotent_idle_entry() -> TestResult {
    let _fx = ParatickFixture::new();

    let now = mock::now();
    mock::NEXT_TMR_NS.store(now + 50_000_000, Ordering::Relaxed);
    mock::NEXT_RCU_NS.store(now + 50_000_000, Ordering::Relaxed);
    mock::MAX_DEFERMENT.store(u64::MAX, Ordering::Relaxed);

    engine::paratick_enter_idle();
    engine::paratick_start_idle();
    let armed_after_first = state::local().is_armed();
    let delta_after_first = mock::TIMER_ARM_LAST_DELTA.load(Ordering::Relaxed);
    let arm_calls_after_first = mock::TIMER_ARM_CALLS.load(Ordering::Relaxed);

    engine::paratick_enter_idle();
    engine::paratick_start_idle();
    let armed_after_second = state::local().is_armed();
    let delta_after_second = mock::TIMER_ARM_LAST_DELTA.load(Ordering::Relaxed);

    assert_eq_test!(armed_after_first, armed_after_second);
    assert_eq_test!(delta_after_first, delta_after_second);
    assert_test!(arm_calls_after_first > 0);
    TestResult::Pass
}

// ---------------------------------------------------------------------------
// P7. Arm/disarm symmetry
// ---------------------------------------------------------------------------

pub fn test_p7_arm_disarm_symmetry() -> TestResult {
    let _fx = ParatickFixture::new();

    let now = mock::now();
    mock::NEXT_TMR_NS.store(now + 50_000_000, Ordering::Relaxed);
    mock::NEXT_RCU_NS.store(now + 50_000_000, Ordering::Relaxed);

    engine::paratick_enter_idle();
    engine::paratick_start_idle();
    assert_test!(state::local().is_armed());

    engine::paratick_exit_idle();
    assert_test!(!state::local().is_armed());
    TestResult::Pass
}

// ---------------------------------------------------------------------------
// P8. Catch-up on IRQ
// ---------------------------------------------------------------------------

pub fn test_p8_catch_up_on_irq() -> TestResult {
    let _fx = ParatickFixture::new();

    engine::paratick_enter_idle();
    assert_test!(state::local().is_idle());

    mock::TICK_DO_UPDATE_JIFFIES_CALLS.store(0, Ordering::Relaxed);
    engine::paratick_irq_enter();
    assert_eq_test!(mock::TICK_DO_UPDATE_JIFFIES_CALLS.load(Ordering::Relaxed), 1);
    TestResult::Pass
}

// ---------------------------------------------------------------------------
// Scenario 1: idle with distant deadline
// ---------------------------------------------------------------------------

pub fn test_scenario_idle_distant_deadline() -> TestResult {
    let _fx = ParatickFixture::new();

    let now = mock::now();
    mock::NEXT_TMR_NS.store(now + 100_000_000, Ordering::Relaxed);
    mock::NEXT_RCU_NS.store(now + 200_000_000, Ordering::Relaxed);
    mock::MAX_DEFERMENT.store(60_000_000, Ordering::Relaxed);

    assert_eq_test!(oracle::next_event(now), Deadline::Absolute(now + 60_000_000));

    engine::paratick_start_idle();
    assert_eq_test!(mock::TIMER_ARM_LAST_DELTA.load(Ordering::Relaxed), 60_000_000);
    assert_test!(mock::NOHZ_BALANCE_ENTER_IDLE_CALLS.load(Ordering::Relaxed) > 0);
    TestResult::Pass
}

// ---------------------------------------------------------------------------
// Scenario 2: idle with near deadline
// ---------------------------------------------------------------------------

pub fn test_scenario_idle_near_deadline() -> TestResult {
    let _fx = ParatickFixture::new();

    let now = mock::now();
    mock::NEXT_TMR_NS.store(now + 1_500_000, Ordering::Relaxed);
    mock::NEXT_RCU_NS.store(now + 200_000_000, Ordering::Relaxed);
    mock::MAX_DEFERMENT.store(60_000_000, Ordering::Relaxed);

    assert_eq_test!(oracle::next_event(now), Deadline::TickPeriod);
    assert_test!(mock::TIMER_CLEAR_IDLE_CALLS.load(Ordering::Relaxed) > 0);
    TestResult::Pass
}

// ---------------------------------------------------------------------------
// Scenario 3: veto by softirq pending
// ---------------------------------------------------------------------------

pub fn test_scenario_veto_softirq_pending() -> TestResult {
    let _fx = ParatickFixture::new();

    let now = mock::now();
    mock::NEXT_TMR_NS.store(now + 1_000, Ordering::Relaxed);
    mock::NEXT_RCU_NS.store(now + 1_000, Ordering::Relaxed);
    mock::LOCAL_SOFTIRQ_PENDING_NONZERO.store(true, Ordering::Relaxed);

    assert_eq_test!(oracle::next_event(now), Deadline::TickPeriod);
    TestResult::Pass
}

// ---------------------------------------------------------------------------
// Scenario 4: timekeeper election
// ---------------------------------------------------------------------------

pub fn test_scenario_timekeeper_election() -> TestResult {
    let _fx = ParatickFixture::new();

    assert_test!(timekeeper::current().is_none());
    timekeeper::elect(3);
    assert_eq_test!(timekeeper::current(), Some(3));
    TestResult::Pass
}

// ---------------------------------------------------------------------------
// Scenario 5: missed-tick accounting
// ---------------------------------------------------------------------------

pub fn test_scenario_missed_tick_accounting() -> TestResult {
    let _fx = ParatickFixture::new();

    state::local().set_last_tick(1_000_000_000);
    mock::set_clock(1_013_500_000);
    mock::ACCOUNT_PROCESS_TICK_CALLS.store(0, Ordering::Relaxed);

    engine::on_timer_expiry(core::ptr::null_mut());

    assert_eq_test!(mock::ACCOUNT_PROCESS_TICK_CALLS.load(Ordering::Relaxed), 3);
    assert_eq_test!(state::local().last_tick(), 1_013_500_000);
    TestResult::Pass
}

// ---------------------------------------------------------------------------
// Scenario 6: idle on timekeeper
// ---------------------------------------------------------------------------

pub fn test_scenario_idle_on_timekeeper() -> TestResult {
    let _fx = ParatickFixture::new();

    timekeeper::elect(3);
    assert_eq_test!(timekeeper::current(), Some(3));
    timekeeper::relinquish(3);
    assert_test!(timekeeper::current().is_none());
    TestResult::Pass
}

slopos_lib::define_test_suite!(
    paratick,
    [
        test_p1_last_tick_monotone,
        test_p2_exact_accounting,
        test_p3_veto_dominance,
        test_p4_deferment_clamp,
        test_p5_single_timekeeper,
        test_p6_idempotent_idle_entry,
        test_p7_arm_disarm_symmetry,
        test_p8_catch_up_on_irq,
        test_scenario_idle_distant_deadline,
        test_scenario_idle_near_deadline,
        test_scenario_veto_softirq_pending,
        test_scenario_timekeeper_election,
        test_scenario_missed_tick_accounting,
        test_scenario_idle_on_timekeeper,
    ]
);
