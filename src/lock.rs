//! Mutually exclusive access between activities
//!
//! Single-owner, reentrant, fair: release hands ownership to the oldest
//! waiter atomically through the scheduling step, so no other activity can
//! sneak in between release and resumption.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::core::event_loop::ActivityId;
use crate::core::handler;
use crate::error::SimResult;
use crate::notify::{wait_on, Notification, Target};

struct LockCore {
    waiters: Notification,
    owner: Cell<Option<ActivityId>>,
    depth: Cell<u32>,
}

impl LockCore {
    /// Hand the lock to the oldest waiter, or free it.
    fn release_next(&self) {
        match self.waiters.awake_next() {
            Some(next_owner) => self.owner.set(Some(next_owner)),
            None => self.owner.set(None),
        }
    }
}

/// Synchronization primitive that may be acquired by only one activity at a
/// time.
///
/// Locks are re-entrant: the owning activity can acquire the same lock
/// again, which allows using them safely in recursive calls. Each
/// acquisition returns a [`LockGuard`] releasing one level on drop.
#[derive(Clone)]
pub struct Lock {
    core: Rc<LockCore>,
}

impl Lock {
    pub fn new() -> Self {
        Self {
            core: Rc::new(LockCore {
                waiters: Notification::new("lock"),
                owner: Cell::new(None),
                depth: Cell::new(0),
            }),
        }
    }

    /// Whether the current activity could acquire this lock without waiting.
    pub fn available(&self) -> bool {
        match self.core.owner.get() {
            None => true,
            Some(owner) => handler::with(|core| core.current_activity()) == owner,
        }
    }

    /// Acquire the lock, waiting in FIFO order behind other activities.
    pub async fn acquire(&self) -> SimResult<LockGuard> {
        let me = handler::with(|core| core.current_activity());
        match self.core.owner.get() {
            None => self.core.owner.set(Some(me)),
            Some(owner) if owner == me => {}
            Some(_) => {
                if let Err(abort) = wait_on(Target::Plain(&self.core.waiters)).await {
                    // ownership may already have passed to us; hand it on
                    if self.core.owner.get() == Some(me) {
                        self.core.release_next();
                    }
                    return Err(abort);
                }
            }
        }
        self.core.depth.set(self.core.depth.get() + 1);
        Ok(LockGuard {
            core: Rc::clone(&self.core),
            owner: me,
        })
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<lock, owner={:?}, depth={}>",
            self.core.owner.get(),
            self.core.depth.get()
        )
    }
}

/// One level of lock ownership; released on drop.
///
/// When the owning activity is forcibly closed while holding the lock, the
/// lock stays blocked: handing it over mid-critical-section would expose
/// the protected state in an unknown shape.
pub struct LockGuard {
    core: Rc<LockCore>,
    owner: ActivityId,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let released_by_owner = handler::try_with(|core| core.current() == Some(self.owner));
        if released_by_owner != Some(true) {
            return;
        }
        debug_assert!(self.core.depth.get() > 0, "lock released more often than acquired");
        let depth = self.core.depth.get().saturating_sub(1);
        self.core.depth.set(depth);
        if depth == 0 {
            self.core.release_next();
        }
    }
}
