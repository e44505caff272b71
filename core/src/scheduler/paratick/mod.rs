//! Per-CPU dynamic tick (tickless) engine.
//!
//! Replaces a fixed-period preemption tick with an adaptive one-shot timer
//! that fires only when work is due: the next pending software timer, the
//! next RCU deadline, or the next housekeeping boundary. Idle CPUs suppress
//! the tick entirely; busy CPUs get the minimum of [`oracle::TICK_PERIOD`]
//! and the next real deadline. Exactly one CPU at a time — the timekeeper —
//! advances wall-clock state.
//!
//! Three pieces cooperate:
//! - [`state::PerCpuTickState`] — per-CPU timer-armed/idle flags and the
//!   last-accounted timestamp.
//! - [`oracle::next_event`] — the pure next-deadline computation.
//! - [`engine`] — idle entry/exit, IRQ entry/exit, timer firing, and
//!   timekeeper election, tying the other two together.
//!
//! Everything the engine needs from the rest of the kernel — the clock,
//! the software timer wheel, RCU, process accounting, the timer hardware
//! itself — comes through [`collaborators::ParatickServices`], registered
//! once at boot (see `boot::boot_paratick`) and swapped for a mock table in
//! tests.

pub mod collaborators;
pub mod engine;
pub mod oracle;
pub mod paratick_tests;
pub mod state;
pub mod timekeeper;

pub use engine::{
    on_irq, paratick_enter_idle, paratick_exit_idle, paratick_init, paratick_irq_enter,
    paratick_irq_exit, paratick_start_idle, setup_paratick_timer,
};
