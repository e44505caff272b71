//! Next-event computation for the dynamic-tick engine.
//!
//! [`next_event`] is a pure function: given the current monotonic time and
//! the CPU's veto/deadline inputs (queried through [`super::collaborators`]),
//! it decides how far the next tick may be deferred. It holds no state of
//! its own so it can be called from both the idle path and the tick body
//! without any re-entrancy concerns.

use super::collaborators::paratick_services;
use super::timekeeper::is_local_cpu_timekeeper;

/// Base tick granularity: 4ms. Deferrals shorter than this round up to a
/// full tick; the timer is never armed to fire sooner.
pub const TICK_PERIOD: u64 = 4_000_000;

/// Result of [`next_event`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deadline {
    /// Fire one tick period from `now`.
    TickPeriod,
    /// Fire at this absolute monotonic timestamp.
    Absolute(u64),
    /// No tick needed; stay tickless until an external event.
    Never,
}

impl Deadline {
    /// Convert to a relative delta from `now`, clamping to zero so a
    /// deadline already in the past still arms immediately rather than
    /// underflowing.
    pub fn delta_from(self, now: u64) -> Option<u64> {
        match self {
            Deadline::TickPeriod => Some(TICK_PERIOD),
            Deadline::Absolute(at) => Some(at.saturating_sub(now)),
            Deadline::Never => None,
        }
    }
}

/// Compute the next tick deadline for the calling CPU given `now`.
///
/// Mirrors the veto-then-clamp-then-tie-break algorithm: any veto source
/// forces a full-period tick; otherwise the timer-wheel and RCU deadlines
/// are combined, clamped against the max-deferment bound when this CPU
/// isn't the timekeeper, and rounded up to at least one tick period.
pub fn next_event(now: u64) -> Deadline {
    let services = paratick_services();

    let rcu_needs = (services.rcu_needs_cpu)(now);
    let veto = rcu_needs.0
        || (services.arch_needs_cpu)()
        || (services.irq_work_needs_cpu)()
        || (services.local_timer_softirq_pending)()
        || (services.local_softirq_pending_nonzero)();

    if veto {
        return Deadline::TickPeriod;
    }

    let next_rcu_ns = rcu_needs.1;
    let jiffies = (services.jiffies)();
    let last_jiffies_update = (services.last_jiffies_update)();
    let next_tmr_ns = (services.get_next_timer_interrupt)(jiffies, last_jiffies_update);

    // Tie-break: next_rcu_ns wins ties against next_tmr_ns.
    let deadline = if next_rcu_ns < next_tmr_ns {
        next_rcu_ns
    } else {
        next_tmr_ns
    };

    if deadline == u64::MAX {
        return Deadline::Never;
    }

    let mut delta = deadline.saturating_sub(now);

    if !is_local_cpu_timekeeper() {
        let max_deferment = (services.timekeeping_max_deferment)();
        if max_deferment < delta {
            delta = max_deferment;
        }
    }

    if delta < TICK_PERIOD {
        (services.timer_clear_idle)();
        return Deadline::TickPeriod;
    }

    if delta == u64::MAX {
        return Deadline::Never;
    }

    Deadline::Absolute(now + delta)
}
