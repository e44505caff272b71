//! One-shot and re-enterable atomic flags for subsystem init/state tracking.
//!
//! [`InitFlag`] guards a piece of global state that must be set up exactly
//! once, no matter how many CPUs race to call the setup path. [`StateFlag`]
//! is the re-enterable sibling used for state that toggles on and off over
//! the life of the kernel (e.g. "shutdown in progress").

use core::sync::atomic::{AtomicBool, Ordering};

/// A flag that can be set exactly once.
///
/// `init_once()` returns `true` to the single caller that wins the race and
/// `false` to everyone else (including the winner, on any later call).
pub struct InitFlag {
    done: AtomicBool,
}

impl InitFlag {
    #[inline]
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
        }
    }

    /// Attempt to claim initialization. Returns `true` exactly once.
    #[inline]
    pub fn init_once(&self) -> bool {
        self.done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl Default for InitFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// A re-enterable boolean flag with idempotent `enter()`.
///
/// Unlike [`InitFlag`], a `StateFlag` can be cleared with `leave()` and
/// entered again; `enter()` still returns `false` for any redundant call
/// while the flag is already active.
pub struct StateFlag {
    active: AtomicBool,
}

impl StateFlag {
    #[inline]
    pub const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
        }
    }

    /// Mark the flag active. Returns `true` if this call transitioned it
    /// from inactive to active, `false` if it was already active.
    #[inline]
    pub fn enter(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn leave(&self) {
        self.active.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_active(&self) {
        self.active.store(true, Ordering::Release);
    }

    /// Atomically read and clear the flag, returning the prior value.
    #[inline]
    pub fn take(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }
}

impl Default for StateFlag {
    fn default() -> Self {
        Self::new()
    }
}
