//! Asynchronous boolean conditions
//!
//! A condition is a notification with a truth value. Awaiting it completes
//! once the value is true; subscribing to an already-true condition wakes
//! the subscriber within the same instant. Conditions compose:
//!
//! - `a & b` is true when both are
//! - `a | b` is true when either is
//! - `!a` delegates to the leaves, which define their own structural inverse
//!
//! Connectives wait by subscribing to every currently-false child,
//! hibernating, and re-evaluating on each wake-up.

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::rc::Rc;

use crate::core::event_loop::{ActivityId, Interrupt, ScheduleAt, Time};
use crate::core::handler;
use crate::error::{Abort, SimResult};
use crate::notify::{Notification, Subscription, Target};
use crate::suspend::{hibernate, postpone};

/// How a condition is awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitMode {
    /// Subscribe to the condition's own notification until true.
    Leaf,
    /// Subscribe to all currently-false children, re-evaluate on wake.
    Composite,
    /// True means "postpone once"; false means "never woken by time alone".
    Never,
}

/// Kind of connective a node represents, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Junction {
    All,
    Any,
}

/// Internal protocol of a condition.
pub(crate) trait ConditionNode {
    /// Current truth value.
    fn probe(&self) -> bool;

    /// The condition's own subscription list.
    fn waiters(&self) -> &Notification;

    /// Which connective this node is, for operator flattening.
    fn junction(&self) -> Option<Junction> {
        None
    }

    /// Structural inverse of this condition.
    fn invert(&self) -> Cond;

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;

    fn wait_mode(&self) -> WaitMode {
        WaitMode::Leaf
    }

    fn children(&self) -> &[Cond] {
        &[]
    }

    /// Subscribe a waiter; an already-true condition schedules the wake-up
    /// immediately instead of enlisting.
    fn subscribe(&self, waiter: ActivityId, interrupt: Interrupt) {
        deliver_or_enlist(self.probe(), self.waiters(), waiter, interrupt);
    }

    fn unsubscribe(&self, waiter: ActivityId, interrupt: &Interrupt) {
        self.waiters().unsubscribe(waiter, interrupt);
    }
}

/// Shared subscribe behaviour: deliver within the current instant when the
/// condition already holds, otherwise enlist the waiter.
pub(crate) fn deliver_or_enlist(
    holds: bool,
    waiters: &Notification,
    waiter: ActivityId,
    interrupt: Interrupt,
) {
    if holds {
        handler::with(|core| core.schedule(waiter, Some(interrupt), ScheduleAt::Now));
    } else {
        waiters.subscribe(waiter, interrupt);
    }
}

/// Handle to an asynchronous condition.
///
/// Obtained from condition-bearing primitives (flags, time conditions,
/// tracked-value comparisons, task `done` states) and composed with the
/// `&`, `|` and `!` operators.
#[derive(Clone)]
pub struct Cond {
    node: Rc<dyn ConditionNode>,
}

impl Cond {
    pub(crate) fn from_node(node: Rc<dyn ConditionNode>) -> Self {
        Self { node }
    }

    pub(crate) fn node(&self) -> &dyn ConditionNode {
        self.node.as_ref()
    }

    /// Current truth value, without suspending.
    pub fn probe(&self) -> bool {
        self.node.probe()
    }

    /// Suspend the current activity until the condition holds.
    ///
    /// An already-true condition still postpones once, so concurrent
    /// activities observe a consistent instant.
    pub async fn wait(&self) -> SimResult<()> {
        match self.node.wait_mode() {
            WaitMode::Leaf => {
                if self.probe() {
                    postpone().await?;
                }
                while !self.probe() {
                    wait_leaf(self.node.as_ref()).await?;
                }
                Ok(())
            }
            WaitMode::Never => {
                if self.probe() {
                    postpone().await
                } else {
                    sleep_forever().await
                }
            }
            WaitMode::Composite => {
                postpone().await?;
                while !self.probe() {
                    self.wait_round().await?;
                }
                Ok(())
            }
        }
    }

    /// One wake-up round of a connective: subscribe to all false children,
    /// hibernate, release the subscriptions.
    async fn wait_round(&self) -> SimResult<()> {
        let subscriptions: Vec<Subscription<'_>> = self
            .node
            .children()
            .iter()
            .filter(|child| !child.probe())
            .map(|child| Subscription::attach(Target::Cond(child.node.as_ref())))
            .collect();
        let delivered = hibernate().await;
        match delivered {
            Some(signal) if subscriptions.iter().any(|s| s.owns(&signal)) => Ok(()),
            Some(foreign) => Err(Abort::Interrupted(foreign)),
            None => Ok(()),
        }
    }
}

async fn wait_leaf(node: &dyn ConditionNode) -> SimResult<()> {
    crate::notify::wait_on(Target::Cond(node)).await
}

/// Hibernate until a foreign interrupt arrives; never woken by time alone.
async fn sleep_forever() -> SimResult<()> {
    loop {
        if let Some(foreign) = hibernate().await {
            return Err(Abort::Interrupted(foreign));
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.node.describe(f)
    }
}

impl fmt::Debug for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<condition {self}, holds={}>", self.probe())
    }
}

/// Children of `cond` when it is the requested connective, else `cond`
/// itself; `a & b & c` flattens into one `All(a, b, c)`.
fn connective_parts(cond: Cond, junction: Junction) -> Vec<Cond> {
    if cond.node.junction() == Some(junction) {
        cond.node.children().to_vec()
    } else {
        vec![cond]
    }
}

impl BitAnd for Cond {
    type Output = Cond;

    fn bitand(self, rhs: Cond) -> Cond {
        let mut children = connective_parts(self, Junction::All);
        children.extend(connective_parts(rhs, Junction::All));
        Cond::from_node(Rc::new(All {
            children,
            waiters: Notification::new("all-of"),
        }))
    }
}

impl BitOr for Cond {
    type Output = Cond;

    fn bitor(self, rhs: Cond) -> Cond {
        let mut children = connective_parts(self, Junction::Any);
        children.extend(connective_parts(rhs, Junction::Any));
        Cond::from_node(Rc::new(Any {
            children,
            waiters: Notification::new("any-of"),
        }))
    }
}

impl Not for Cond {
    type Output = Cond;

    fn not(self) -> Cond {
        self.node.invert()
    }
}

/// Logical AND of all sub-conditions.
struct All {
    children: Vec<Cond>,
    waiters: Notification,
}

impl ConditionNode for All {
    fn probe(&self) -> bool {
        self.children.iter().all(Cond::probe)
    }

    fn waiters(&self) -> &Notification {
        &self.waiters
    }

    fn invert(&self) -> Cond {
        let inverted: Vec<Cond> = self.children.iter().map(|c| !c.clone()).collect();
        Cond::from_node(Rc::new(Any {
            children: inverted,
            waiters: Notification::new("any-of"),
        }))
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (index, child) in self.children.iter().enumerate() {
            if index > 0 {
                write!(f, " & ")?;
            }
            write!(f, "{child}")?;
        }
        write!(f, ")")
    }

    fn wait_mode(&self) -> WaitMode {
        WaitMode::Composite
    }

    fn children(&self) -> &[Cond] {
        &self.children
    }

    fn junction(&self) -> Option<Junction> {
        Some(Junction::All)
    }
}

/// Logical OR of all sub-conditions.
struct Any {
    children: Vec<Cond>,
    waiters: Notification,
}

impl ConditionNode for Any {
    fn probe(&self) -> bool {
        self.children.iter().any(Cond::probe)
    }

    fn waiters(&self) -> &Notification {
        &self.waiters
    }

    fn invert(&self) -> Cond {
        let inverted: Vec<Cond> = self.children.iter().map(|c| !c.clone()).collect();
        Cond::from_node(Rc::new(All {
            children: inverted,
            waiters: Notification::new("all-of"),
        }))
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (index, child) in self.children.iter().enumerate() {
            if index > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{child}")?;
        }
        write!(f, ")")
    }

    fn wait_mode(&self) -> WaitMode {
        WaitMode::Composite
    }

    fn children(&self) -> &[Cond] {
        &self.children
    }

    fn junction(&self) -> Option<Junction> {
        Some(Junction::Any)
    }
}

/// A point an activity can be subscribed to: any condition, or a one-shot
/// relative delay. Used by [`until`](crate::scope::until).
pub struct WaitPoint {
    inner: WaitPointInner,
}

enum WaitPointInner {
    Node(Cond),
    Delay(Time),
}

impl WaitPoint {
    pub(crate) fn subscribe(&self, waiter: ActivityId, interrupt: Interrupt) {
        match &self.inner {
            WaitPointInner::Node(cond) => cond.node().subscribe(waiter, interrupt),
            WaitPointInner::Delay(duration) => handler::with(|core| {
                core.schedule(waiter, Some(interrupt), ScheduleAt::Delay(*duration));
            }),
        }
    }

    pub(crate) fn unsubscribe(&self, waiter: ActivityId, interrupt: &Interrupt) {
        match &self.inner {
            WaitPointInner::Node(cond) => cond.node().unsubscribe(waiter, interrupt),
            WaitPointInner::Delay(_) => interrupt.revoke(),
        }
    }
}

impl From<Cond> for WaitPoint {
    fn from(cond: Cond) -> Self {
        Self {
            inner: WaitPointInner::Node(cond),
        }
    }
}

impl WaitPoint {
    pub(crate) fn from_delay(duration: Time) -> Self {
        Self {
            inner: WaitPointInner::Delay(duration),
        }
    }
}

/// Derive `From<T> for Cond` companions into [`WaitPoint`].
macro_rules! waitpoint_via_cond {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for $crate::condition::WaitPoint {
                fn from(value: $ty) -> Self {
                    $crate::condition::Cond::from(value).into()
                }
            }
        )+
    };
}

pub(crate) use waitpoint_via_cond;
