//! Notifications: subscription points that wake suspended activities
//!
//! A [`Notification`] is an insertion-ordered list of `(waiter, interrupt)`
//! pairs. Waking is either anycast ([`Notification::awake_next`], oldest
//! waiter first) or broadcast ([`Notification::awake_all`], subscription
//! order preserved in scheduling order).
//!
//! Waiting is always guarded: a [`Subscription`] unsubscribes on drop, and
//! revokes the wake-up interrupt instead when it was already scheduled, so
//! stale activations are neutralised.

use std::cell::RefCell;
use std::fmt;

use crate::condition::ConditionNode;
use crate::core::event_loop::{ActivityId, Interrupt, ScheduleAt};
use crate::core::handler;
use crate::error::{Abort, SimResult};
use crate::suspend::hibernate;

/// Insertion-ordered set of activities waiting to be woken.
pub(crate) struct Notification {
    label: &'static str,
    waiting: RefCell<Vec<(ActivityId, Interrupt)>>,
}

impl Notification {
    pub(crate) fn new(label: &'static str) -> Self {
        Self {
            label,
            waiting: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self, waiter: ActivityId, interrupt: Interrupt) {
        self.waiting.borrow_mut().push((waiter, interrupt));
    }

    /// Remove a subscription; a wake-up already in flight is revoked instead.
    pub(crate) fn unsubscribe(&self, waiter: ActivityId, interrupt: &Interrupt) {
        if interrupt.scheduled() {
            interrupt.revoke();
        } else {
            self.waiting
                .borrow_mut()
                .retain(|(w, i)| !(*w == waiter && i.is(interrupt)));
        }
    }

    /// Awake the oldest waiter (anycast). Returns its identity, or `None`
    /// when nobody is subscribed.
    pub(crate) fn awake_next(&self) -> Option<ActivityId> {
        let (waiter, interrupt) = {
            let mut waiting = self.waiting.borrow_mut();
            if waiting.is_empty() {
                return None;
            }
            waiting.remove(0)
        };
        handler::try_with(|core| core.schedule(waiter, Some(interrupt), ScheduleAt::Now));
        Some(waiter)
    }

    /// Awake all waiters (broadcast) in subscription order.
    pub(crate) fn awake_all(&self) {
        let awoken = {
            let mut waiting = self.waiting.borrow_mut();
            std::mem::take(&mut *waiting)
        };
        // wakes after the loop is torn down are dropped silently
        handler::try_with(|core| {
            for (waiter, interrupt) in awoken {
                core.schedule(waiter, Some(interrupt), ScheduleAt::Now);
            }
        });
    }

    pub(crate) fn waiter_count(&self) -> usize {
        self.waiting.borrow().len()
    }
}

impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<notification '{}', waiters={}>",
            self.label,
            self.waiter_count()
        )
    }
}

impl Drop for Notification {
    fn drop(&mut self) {
        let leaked = self.waiting.borrow().len();
        if leaked == 0 {
            return;
        }
        // dropping mid-simulation with live waiters is a bug; after the
        // loop is gone the interrupts are dead anyway
        if handler::is_active() && !std::thread::panicking() {
            debug_assert!(
                false,
                "notification '{}' dropped with {} waiting activities",
                self.label, leaked
            );
        }
    }
}

/// Where a subscription is registered.
pub(crate) enum Target<'a> {
    /// A bare notification.
    Plain(&'a Notification),
    /// A condition, which delivers immediately when already true.
    Cond(&'a dyn ConditionNode),
}

impl Target<'_> {
    fn subscribe(&self, waiter: ActivityId, interrupt: Interrupt) {
        match self {
            Target::Plain(notification) => notification.subscribe(waiter, interrupt),
            Target::Cond(node) => node.subscribe(waiter, interrupt),
        }
    }

    fn unsubscribe(&self, waiter: ActivityId, interrupt: &Interrupt) {
        match self {
            Target::Plain(notification) => notification.unsubscribe(waiter, interrupt),
            Target::Cond(node) => node.unsubscribe(waiter, interrupt),
        }
    }
}

/// Subscription of the current activity, released on drop.
pub(crate) struct Subscription<'a> {
    target: Target<'a>,
    waiter: ActivityId,
    interrupt: Interrupt,
}

impl<'a> Subscription<'a> {
    pub(crate) fn attach(target: Target<'a>) -> Self {
        let waiter = handler::with(|core| core.current_activity());
        let interrupt = Interrupt::notify();
        target.subscribe(waiter, interrupt.clone());
        Self {
            target,
            waiter,
            interrupt,
        }
    }

    pub(crate) fn owns(&self, signal: &Interrupt) -> bool {
        signal.is(&self.interrupt)
    }
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        self.target.unsubscribe(self.waiter, &self.interrupt);
    }
}

/// Subscribe the current activity to `target` and hibernate until woken.
///
/// A foreign interrupt arriving first is re-raised after the subscription is
/// released.
pub(crate) async fn wait_on(target: Target<'_>) -> SimResult<()> {
    let me = handler::with(|core| core.current_activity());
    let subscription = Subscription::attach(target);
    let delivered = hibernate().await;
    match delivered {
        Some(signal) if subscription.owns(&signal) => Ok(()),
        Some(foreign) => {
            debug_assert!(
                handler::with(|core| core.current_activity()) == me,
                "break points cannot be passed between activities"
            );
            Err(Abort::Interrupted(foreign))
        }
        None => Ok(()),
    }
}
