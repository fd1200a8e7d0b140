//! Tracked values: mutations generate events for derived conditions
//!
//! A [`Tracked`] value is mutated only through [`Tracked::set`] (or the
//! arithmetic shorthands that reduce to it). After each mutation the
//! weakly-held listeners are notified, then the caller postpones once so
//! that woken waiters observe the change before control returns.
//!
//! Comparisons derive a [`Watch`] condition from the value:
//!
//! ```ignore
//! let coffee = Tracked::new(1.0_f64);
//! coffee.below(0.1).wait().await?;   // wake once coffee drops below 0.1
//! coffee.add(0.9).await?;            // mutate, waking matching watchers
//! ```
//!
//! Tracked values themselves have no truth value and cannot be awaited;
//! only derived conditions and operations can.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::condition::{Cond, ConditionNode};
use crate::error::SimResult;
use crate::notify::Notification;
use crate::suspend::postpone;

/// Comparison operator of a [`Watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Below,
    AtMost,
    Equal,
    Unequal,
    AtLeast,
    Above,
}

impl Cmp {
    /// Structural negation: `<` becomes `>=`, `==` becomes `!=`, and so on.
    fn inverse(self) -> Self {
        match self {
            Cmp::Below => Cmp::AtLeast,
            Cmp::AtMost => Cmp::Above,
            Cmp::Equal => Cmp::Unequal,
            Cmp::Unequal => Cmp::Equal,
            Cmp::AtLeast => Cmp::Below,
            Cmp::Above => Cmp::AtMost,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Cmp::Below => "<",
            Cmp::AtMost => "<=",
            Cmp::Equal => "==",
            Cmp::Unequal => "!=",
            Cmp::AtLeast => ">=",
            Cmp::Above => ">",
        }
    }

    fn test<V: PartialOrd>(self, left: &V, right: &V) -> bool {
        match self {
            Cmp::Below => left < right,
            Cmp::AtMost => left <= right,
            Cmp::Equal => left == right,
            Cmp::Unequal => left != right,
            Cmp::AtLeast => left >= right,
            Cmp::Above => left > right,
        }
    }
}

pub(crate) trait ChangeListener {
    fn on_changed(&self);
}

pub(crate) struct TrackedCore<V> {
    value: RefCell<V>,
    listeners: RefCell<Vec<Weak<dyn ChangeListener>>>,
}

impl<V> TrackedCore<V> {
    /// Notify a snapshot of the live listeners, pruning dead ones.
    fn notify(&self) {
        let snapshot: Vec<Rc<dyn ChangeListener>> = {
            let mut listeners = self.listeners.borrow_mut();
            listeners.retain(|listener| listener.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in snapshot {
            listener.on_changed();
        }
    }

    fn add_listener(&self, listener: Weak<dyn ChangeListener>) {
        self.listeners.borrow_mut().push(listener);
    }
}

/// A mutable value whose changes are tracked to trigger events.
pub struct Tracked<V> {
    core: Rc<TrackedCore<V>>,
}

impl<V> Clone for Tracked<V> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<V: 'static> Tracked<V> {
    pub fn new(value: V) -> Self {
        Self {
            core: Rc::new(TrackedCore {
                value: RefCell::new(value),
                listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Read the current value through a closure, without cloning.
    pub fn peek<R>(&self, read: impl FnOnce(&V) -> R) -> R {
        read(&self.core.value.borrow())
    }

    /// The current value.
    pub fn get(&self) -> V
    where
        V: Clone,
    {
        self.core.value.borrow().clone()
    }

    /// Set the value, notify listeners whose predicate now holds, and
    /// postpone once so downstream waiters observe the change.
    pub async fn set(&self, to: V) -> SimResult<()> {
        *self.core.value.borrow_mut() = to;
        self.core.notify();
        postpone().await
    }

    fn watch(&self, op: Cmp, operand: Operand<V>) -> Watch<V>
    where
        V: PartialOrd,
    {
        Watch::new(Rc::clone(&self.core), op, operand)
    }

    /// Condition `value < rhs`.
    pub fn below(&self, rhs: impl IntoOperand<V>) -> Watch<V>
    where
        V: PartialOrd,
    {
        self.watch(Cmp::Below, rhs.into_operand())
    }

    /// Condition `value <= rhs`.
    pub fn at_most(&self, rhs: impl IntoOperand<V>) -> Watch<V>
    where
        V: PartialOrd,
    {
        self.watch(Cmp::AtMost, rhs.into_operand())
    }

    /// Condition `value == rhs`.
    pub fn equals(&self, rhs: impl IntoOperand<V>) -> Watch<V>
    where
        V: PartialOrd,
    {
        self.watch(Cmp::Equal, rhs.into_operand())
    }

    /// Condition `value != rhs`.
    pub fn differs(&self, rhs: impl IntoOperand<V>) -> Watch<V>
    where
        V: PartialOrd,
    {
        self.watch(Cmp::Unequal, rhs.into_operand())
    }

    /// Condition `value >= rhs`.
    pub fn at_least(&self, rhs: impl IntoOperand<V>) -> Watch<V>
    where
        V: PartialOrd,
    {
        self.watch(Cmp::AtLeast, rhs.into_operand())
    }

    /// Condition `value > rhs`.
    pub fn above(&self, rhs: impl IntoOperand<V>) -> Watch<V>
    where
        V: PartialOrd,
    {
        self.watch(Cmp::Above, rhs.into_operand())
    }

    /// `set(value + rhs)`.
    pub async fn add(&self, rhs: V) -> SimResult<()>
    where
        V: std::ops::Add<Output = V> + Clone,
    {
        let updated = self.get() + rhs;
        self.set(updated).await
    }

    /// `set(value - rhs)`.
    pub async fn sub(&self, rhs: V) -> SimResult<()>
    where
        V: std::ops::Sub<Output = V> + Clone,
    {
        let updated = self.get() - rhs;
        self.set(updated).await
    }

    /// `set(value * rhs)`.
    pub async fn mul(&self, rhs: V) -> SimResult<()>
    where
        V: std::ops::Mul<Output = V> + Clone,
    {
        let updated = self.get() * rhs;
        self.set(updated).await
    }

    /// `set(value / rhs)`.
    pub async fn div(&self, rhs: V) -> SimResult<()>
    where
        V: std::ops::Div<Output = V> + Clone,
    {
        let updated = self.get() / rhs;
        self.set(updated).await
    }
}

impl<V: fmt::Debug> fmt::Debug for Tracked<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tracked({:?})", self.core.value.borrow())
    }
}

/// Right-hand side of a comparison: a constant or another tracked value.
pub enum Operand<V> {
    Constant(V),
    Cell(Tracked<V>),
}

/// Conversion into a comparison operand.
pub trait IntoOperand<V> {
    fn into_operand(self) -> Operand<V>;
}

impl<V> IntoOperand<V> for V {
    fn into_operand(self) -> Operand<V> {
        Operand::Constant(self)
    }
}

impl<V> IntoOperand<V> for &Tracked<V> {
    fn into_operand(self) -> Operand<V> {
        Operand::Cell(self.clone())
    }
}

struct WatchNode<V> {
    left: Rc<TrackedCore<V>>,
    op: Cmp,
    right: Operand<V>,
    waiters: Notification,
}

impl<V: PartialOrd + 'static> WatchNode<V> {
    fn test(&self) -> bool {
        let left = self.left.value.borrow();
        match &self.right {
            Operand::Constant(value) => self.op.test(&*left, value),
            Operand::Cell(tracked) => {
                if Rc::ptr_eq(&self.left, &tracked.core) {
                    let right = self.left.value.borrow();
                    self.op.test(&*left, &*right)
                } else {
                    let right = tracked.core.value.borrow();
                    self.op.test(&*left, &*right)
                }
            }
        }
    }
}

impl<V: PartialOrd + 'static> ChangeListener for WatchNode<V> {
    fn on_changed(&self) {
        if self.test() {
            self.waiters.awake_all();
        }
    }
}

/// An asynchronous comparison of a [`Tracked`] value.
///
/// Like any condition it can be probed, awaited, and composed; negation is
/// rewritten structurally (`<` into `>=` and so on) instead of wrapping.
pub struct Watch<V> {
    node: Rc<WatchNode<V>>,
}

impl<V: PartialOrd + 'static> Watch<V> {
    fn new(left: Rc<TrackedCore<V>>, op: Cmp, right: Operand<V>) -> Self {
        let node = Rc::new(WatchNode {
            left,
            op,
            right,
            waiters: Notification::new("comparison"),
        });
        let as_listener = Rc::clone(&node) as Rc<dyn ChangeListener>;
        node.left.add_listener(Rc::downgrade(&as_listener));
        if let Operand::Cell(tracked) = &node.right {
            tracked.core.add_listener(Rc::downgrade(&as_listener));
        }
        Self { node }
    }

    /// Current truth value.
    pub fn probe(&self) -> bool {
        self.node.test()
    }

    /// This comparison as a composable condition.
    pub fn cond(&self) -> Cond {
        Cond::from(self.clone())
    }

    /// Suspend until the comparison holds.
    pub async fn wait(&self) -> SimResult<()> {
        self.cond().wait().await
    }
}

impl<V> Clone for Watch<V> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<V: PartialOrd + 'static> ConditionNode for Watch<V> {
    fn probe(&self) -> bool {
        self.node.test()
    }

    fn waiters(&self) -> &Notification {
        &self.node.waiters
    }

    fn invert(&self) -> Cond {
        // the operand cannot be cloned generically; the inverse shares the
        // base node and applies the inverted operator on top
        let node = Rc::new(InvertedWatchNode {
            base: Rc::clone(&self.node),
            waiters: Notification::new("comparison"),
        });
        let as_listener = Rc::clone(&node) as Rc<dyn ChangeListener>;
        node.base.left.add_listener(Rc::downgrade(&as_listener));
        if let Operand::Cell(tracked) = &node.base.right {
            tracked.core.add_listener(Rc::downgrade(&as_listener));
        }
        Cond::from(InvertedWatch { node })
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tracked {} _", self.node.op.symbol())
    }
}

impl<V: PartialOrd + 'static> From<Watch<V>> for Cond {
    fn from(watch: Watch<V>) -> Self {
        Cond::from_node(Rc::new(watch))
    }
}

/// Structurally negated view over an existing comparison node.
struct InvertedWatchNode<V> {
    base: Rc<WatchNode<V>>,
    waiters: Notification,
}

struct InvertedWatch<V> {
    node: Rc<InvertedWatchNode<V>>,
}

impl<V: PartialOrd + 'static> InvertedWatchNode<V> {
    fn test(&self) -> bool {
        let left = self.base.left.value.borrow();
        let op = self.base.op.inverse();
        match &self.base.right {
            Operand::Constant(value) => op.test(&*left, value),
            Operand::Cell(tracked) => {
                if Rc::ptr_eq(&self.base.left, &tracked.core) {
                    let right = self.base.left.value.borrow();
                    op.test(&*left, &*right)
                } else {
                    let right = tracked.core.value.borrow();
                    op.test(&*left, &*right)
                }
            }
        }
    }
}

impl<V: PartialOrd + 'static> ChangeListener for InvertedWatchNode<V> {
    fn on_changed(&self) {
        if self.test() {
            self.waiters.awake_all();
        }
    }
}

impl<V: PartialOrd + 'static> ConditionNode for InvertedWatch<V> {
    fn probe(&self) -> bool {
        self.node.test()
    }

    fn waiters(&self) -> &Notification {
        &self.node.waiters
    }

    fn invert(&self) -> Cond {
        Cond::from(Watch {
            node: Rc::clone(&self.node.base),
        })
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tracked {} _", self.node.base.op.inverse().symbol())
    }
}

impl<V: PartialOrd + 'static> From<InvertedWatch<V>> for Cond {
    fn from(watch: InvertedWatch<V>) -> Self {
        Cond::from_node(Rc::new(watch))
    }
}
