//! Thread-local access to the running event loop
//!
//! A single per-thread slot exposes the "current" loop so activities and
//! kernel subsystems can reach it without threading it through every call.
//! Nested simulations shadow the slot like a stack; accessing it with no
//! active simulation fails with a clear error instead of a silent default.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::event_loop::Loop;

thread_local! {
    static ACTIVE: RefCell<Vec<Rc<Loop>>> = const { RefCell::new(Vec::new()) };
}

/// Whether a simulation is running on this thread.
pub fn is_active() -> bool {
    ACTIVE.with(|stack| !stack.borrow().is_empty())
}

/// Run `f` with the thread-current loop.
///
/// # Panics
///
/// Panics when no simulation is active on this thread. This usually means an
/// async kernel feature was used outside of `chronoflow::run`, e.g. under a
/// different async runtime.
pub(crate) fn with<R>(f: impl FnOnce(&Rc<Loop>) -> R) -> R {
    ACTIVE.with(|stack| {
        let stack = stack.borrow();
        match stack.last() {
            Some(current) => f(current),
            None => panic!(
                "no active simulation in this thread\n\
                 kernel features can only be used by activities running \
                 under chronoflow::run"
            ),
        }
    })
}

/// Like [`with`], but returns `None` outside a simulation. Used on cleanup
/// paths that must degrade silently once the loop is torn down.
pub(crate) fn try_with<R>(f: impl FnOnce(&Rc<Loop>) -> R) -> Option<R> {
    ACTIVE.with(|stack| {
        let stack = stack.borrow();
        stack.last().map(f)
    })
}

/// Guard installing `current` as the thread-current loop until dropped.
pub(crate) struct Scoped;

pub(crate) fn enter(current: Rc<Loop>) -> Scoped {
    ACTIVE.with(|stack| stack.borrow_mut().push(current));
    Scoped
}

impl Drop for Scoped {
    fn drop(&mut self) {
        ACTIVE.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_by_default() {
        assert!(!is_active());
        assert!(try_with(|_| ()).is_none());
    }

    #[test]
    #[should_panic(expected = "no active simulation")]
    fn with_panics_outside_a_simulation() {
        with(|_| ());
    }
}
