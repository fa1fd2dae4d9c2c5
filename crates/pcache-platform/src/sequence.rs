//! Sequence affinity.
//!
//! Types that keep their bookkeeping without locks embed a [`SequenceChecker`]
//! and call [`SequenceChecker::check`] at every public entry point, shared or
//! exclusive. The checker binds to the constructing thread (or, once
//! detached, to the next thread that checks) and flags any call made from
//! another thread.
//!
//! In debug builds a violation panics. Release builds only log it.

use std::{
    sync::OnceLock,
    thread::{self, ThreadId},
};

use tracing::warn;

/// Records the thread an owner is bound to.
#[derive(Debug, Clone)]
pub struct SequenceChecker {
    owner: OnceLock<ThreadId>,
}

impl SequenceChecker {
    /// Bind to the current thread.
    #[must_use]
    pub fn new() -> Self {
        Self {
            owner: OnceLock::from(thread::current().id()),
        }
    }

    /// Create an unbound checker; the first [`check`](Self::check) binds it.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            owner: OnceLock::new(),
        }
    }

    /// Forget the bound thread so the next caller becomes the owner.
    ///
    /// Use this when an instance is constructed on one thread and handed to another.
    pub fn detach(&mut self) {
        self.owner = OnceLock::new();
    }

    /// Whether the current thread is the bound one (binding it if unbound).
    pub fn called_on_valid_sequence(&self) -> bool {
        let current = thread::current().id();
        *self.owner.get_or_init(|| current) == current
    }

    /// Assert affinity.
    ///
    /// # Panics
    ///
    /// Panics in debug builds when called from a thread other than the bound one.
    #[track_caller]
    pub fn check(&self) {
        let valid = self.called_on_valid_sequence();
        if !valid {
            warn!(
                owner = ?self.owner.get(),
                current = ?thread::current().id(),
                "called off the owning sequence"
            );
        }
        debug_assert!(valid, "called off the owning sequence");
    }
}

impl Default for SequenceChecker {
    fn default() -> Self {
        Self::new()
    }
}
