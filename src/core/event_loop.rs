//! Interrupt-based event loop over simulated time
//!
//! The loop runs a number of activities cooperatively. An activity is a
//! boxed future polled by the loop exactly once per [`Activation`]; the only
//! suspension command it may issue is hibernation (see [`crate::suspend`]),
//! which parks the future until another activation is scheduled for it.
//!
//! Scheduling is a side channel: activities (and kernel subsystems) reach
//! the loop through the thread-local handler and call
//! [`Loop::schedule`], optionally attaching an [`Interrupt`] that is
//! delivered when the target resumes. Revoking an interrupt before delivery
//! neutralises its activation.
//!
//! The loop is fatal-first: a [`KernelError`] recorded by a root activity
//! aborts the simulation before any further activation is dispatched.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::Context;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use tracing::{debug, trace};

use crate::core::handler;
use crate::core::waitq::WaitQueue;
use crate::error::{Abort, KernelError, SimResult};

/// Virtual time axis. There is no inherent unit; a simulation should use a
/// consistent one.
pub type Time = f64;

/// Identity of an activity within one loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ActivityId(u64);

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "activity-{}", self.0)
    }
}

/// Progress marker within a simulation: the pair of virtual time and the
/// number of activities run at that time so far. Strictly monotonic.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Stamp {
    /// Current virtual time.
    pub time: Time,
    /// Activities dispatched within the current instant.
    pub turn: u64,
}

static SERIAL: AtomicU64 = AtomicU64::new(0);

/// Process-wide serial for task/scope identities.
pub(crate) fn next_serial() -> u64 {
    SERIAL.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
pub(crate) enum Token {
    /// Wake-up armed by the suspending activity itself.
    Wake { reason: &'static str },
    /// Wake-up armed by a notification subscription.
    Notify,
    /// A task is being cancelled.
    CancelTask { task: u64, token: String },
    /// A scope is being cancelled.
    CancelScope { scope: u64 },
}

/// Distinguished signal injected into an activity on resumption.
///
/// Interrupts carry a token describing their purpose, a `scheduled` flag set
/// when an activation referencing them is queued, and a `revoked` flag that
/// turns any pending activation into a no-op. An interrupt is consumed at
/// most once.
#[derive(Clone)]
pub struct Interrupt {
    core: Rc<InterruptCore>,
}

struct InterruptCore {
    token: Token,
    scheduled: Cell<bool>,
    revoked: Cell<bool>,
    consumed: Cell<bool>,
}

impl Interrupt {
    fn new(token: Token) -> Self {
        Self {
            core: Rc::new(InterruptCore {
                token,
                scheduled: Cell::new(false),
                revoked: Cell::new(false),
                consumed: Cell::new(false),
            }),
        }
    }

    pub(crate) fn wake(reason: &'static str) -> Self {
        Self::new(Token::Wake { reason })
    }

    pub(crate) fn notify() -> Self {
        Self::new(Token::Notify)
    }

    pub(crate) fn cancel_task(task: u64, token: String) -> Self {
        Self::new(Token::CancelTask { task, token })
    }

    pub(crate) fn cancel_scope(scope: u64) -> Self {
        Self::new(Token::CancelScope { scope })
    }

    /// Identity comparison: interrupts are equal only to themselves.
    pub fn is(&self, other: &Interrupt) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }

    /// Revoke the interrupt, cancelling any pending activation carrying it.
    pub(crate) fn revoke(&self) {
        self.core.revoked.set(true);
    }

    pub(crate) fn revoked(&self) -> bool {
        self.core.revoked.get()
    }

    pub(crate) fn scheduled(&self) -> bool {
        self.core.scheduled.get()
    }

    pub(crate) fn mark_scheduled(&self) {
        self.core.scheduled.set(true);
    }

    /// Whether the interrupt was delivered into a suspension point.
    pub(crate) fn consumed(&self) -> bool {
        self.core.consumed.get()
    }

    pub(crate) fn mark_consumed(&self) {
        self.core.consumed.set(true);
    }

    pub(crate) fn cancels_task(&self, task: u64) -> bool {
        matches!(self.core.token, Token::CancelTask { task: t, .. } if t == task)
    }

    pub(crate) fn is_task_cancellation(&self) -> bool {
        matches!(self.core.token, Token::CancelTask { .. })
    }

    pub(crate) fn cancels_scope(&self, scope: u64) -> bool {
        matches!(self.core.token, Token::CancelScope { scope: s } if s == scope)
    }

    pub(crate) fn cancellation_token(&self) -> Option<&str> {
        match &self.core.token {
            Token::CancelTask { token, .. } => Some(token),
            _ => None,
        }
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let revoked = if self.revoked() { " (revoked)" } else { "" };
        match &self.core.token {
            Token::Wake { reason } => write!(f, "<wake-up '{reason}'{revoked}>"),
            Token::Notify => write!(f, "<notification{revoked}>"),
            Token::CancelTask { task, token } => {
                write!(f, "<cancel task-{task} '{token}'{revoked}>")
            }
            Token::CancelScope { scope } => write!(f, "<cancel scope-{scope}{revoked}>"),
        }
    }
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Scheduled wake-up of an activity, optionally carrying an interrupt.
pub(crate) struct Activation {
    target: ActivityId,
    signal: Option<Interrupt>,
}

impl Activation {
    fn live(&self) -> bool {
        self.signal.as_ref().map_or(true, |signal| !signal.revoked())
    }
}

/// When to execute a scheduled activation.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ScheduleAt {
    /// Append to the current instant, preserving FIFO order.
    Now,
    /// Relative delay; must be strictly positive.
    Delay(Time),
    /// Absolute time; must be strictly after the current time.
    At(Time),
}

struct Slot {
    future: Option<LocalBoxFuture<'static, ()>>,
    delivery: Option<Interrupt>,
}

struct Sched {
    time: Time,
    turn: u64,
    pending: VecDeque<Activation>,
    queued: WaitQueue<Activation>,
    fault: Option<KernelError>,
}

/// Per-thread event loop of one simulation.
pub(crate) struct Loop {
    sched: RefCell<Sched>,
    table: RefCell<HashMap<ActivityId, Slot>>,
    current: Cell<Option<ActivityId>>,
    next_activity: Cell<u64>,
}

impl Loop {
    fn new(start: Time, queued: WaitQueue<Activation>) -> Self {
        Self {
            sched: RefCell::new(Sched {
                time: start,
                turn: 0,
                pending: VecDeque::new(),
                queued,
                fault: None,
            }),
            table: RefCell::new(HashMap::new()),
            current: Cell::new(None),
            next_activity: Cell::new(0),
        }
    }

    pub(crate) fn now(&self) -> Time {
        self.sched.borrow().time
    }

    pub(crate) fn stamp(&self) -> Stamp {
        let sched = self.sched.borrow();
        Stamp {
            time: sched.time,
            turn: sched.turn,
        }
    }

    pub(crate) fn current(&self) -> Option<ActivityId> {
        self.current.get()
    }

    /// The activity being executed right now; scheduling primitives may only
    /// be used from inside one.
    pub(crate) fn current_activity(&self) -> ActivityId {
        match self.current.get() {
            Some(id) => id,
            None => panic!(
                "kernel primitives may only suspend from inside a running activity"
            ),
        }
    }

    /// Register an activity without scheduling it.
    pub(crate) fn insert(&self, future: LocalBoxFuture<'static, ()>) -> ActivityId {
        let id = ActivityId(self.next_activity.get());
        self.next_activity.set(id.0 + 1);
        self.table.borrow_mut().insert(
            id,
            Slot {
                future: Some(future),
                delivery: None,
            },
        );
        id
    }

    /// Register an activity and schedule its first run.
    pub(crate) fn spawn(&self, future: LocalBoxFuture<'static, ()>, when: ScheduleAt) -> ActivityId {
        let id = self.insert(future);
        self.schedule(id, None, when);
        id
    }

    /// Drop an activity's future, turning all of its pending activations
    /// into no-ops. Guards owned by the future run their cleanup now.
    pub(crate) fn close_activity(&self, id: ActivityId) {
        debug_assert!(
            self.current.get() != Some(id),
            "an activity cannot be closed while it is executing"
        );
        // the removed future must drop outside the table borrow: its guards
        // may close further activities through this very table
        let removed = self.table.borrow_mut().remove(&id);
        drop(removed);
    }

    pub(crate) fn take_delivery(&self, id: ActivityId) -> Option<Interrupt> {
        self.table
            .borrow_mut()
            .get_mut(&id)
            .and_then(|slot| slot.delivery.take())
    }

    /// Record a fatal fault; the loop aborts before the next activation.
    pub(crate) fn set_fault(&self, fault: KernelError) {
        let mut sched = self.sched.borrow_mut();
        if sched.fault.is_none() {
            sched.fault = Some(fault);
        }
    }

    /// Schedule the execution of an activity.
    ///
    /// Without a date the activation is appended to the current instant;
    /// relative dates must be strictly positive and absolute dates strictly
    /// in the future. A provided `signal` is marked scheduled and delivered
    /// on resumption.
    pub(crate) fn schedule(&self, target: ActivityId, signal: Option<Interrupt>, when: ScheduleAt) {
        if let Some(signal) = &signal {
            signal.mark_scheduled();
        }
        let mut sched = self.sched.borrow_mut();
        trace!(activity = %target, ?when, "schedule");
        let activation = Activation { target, signal };
        match when {
            ScheduleAt::Now => sched.pending.push_back(activation),
            ScheduleAt::Delay(delay) => {
                assert!(delay > 0.0, "schedule date must not be in the past");
                let at = sched.time + delay;
                sched.queued.push(at, activation);
            }
            ScheduleAt::At(at) => {
                assert!(at > sched.time, "schedule date must not be in the past");
                sched.queued.push(at, activation);
            }
        }
    }

    fn next_activation(&self) -> Result<Option<Activation>, KernelError> {
        loop {
            let mut sched = self.sched.borrow_mut();
            if let Some(fault) = sched.fault.take() {
                return Err(fault);
            }
            if let Some(activation) = sched.pending.pop_front() {
                return Ok(Some(activation));
            }
            match sched.queued.pop() {
                Some((key, bucket)) => {
                    debug_assert!(key.value() >= sched.time, "virtual time must not run backwards");
                    sched.time = key.value();
                    sched.turn = 0;
                    sched.pending = bucket;
                    trace!(time = sched.time, "advance");
                }
                None => return Ok(None),
            }
        }
    }

    fn run_events(self: &Rc<Self>) -> Result<(), KernelError> {
        while let Some(activation) = self.next_activation()? {
            if !activation.live() {
                continue;
            }
            self.dispatch(activation);
        }
        Ok(())
    }

    fn dispatch(self: &Rc<Self>, activation: Activation) {
        let id = activation.target;
        let future = {
            let mut table = self.table.borrow_mut();
            match table.get_mut(&id) {
                Some(slot) => {
                    slot.delivery = activation.signal;
                    slot.future.take()
                }
                // the activity finished or was closed; stale wake-up
                None => None,
            }
        };
        let Some(mut future) = future else {
            return;
        };
        self.sched.borrow_mut().turn += 1;
        self.current.set(Some(id));
        let waker = futures::task::noop_waker();
        let mut context = Context::from_waker(&waker);
        let finished = future.as_mut().poll(&mut context).is_ready();
        self.current.set(None);
        let mut table = self.table.borrow_mut();
        if finished {
            table.remove(&id);
        } else if let Some(slot) = table.get_mut(&id) {
            slot.future = Some(future);
        }
    }

    /// Drop all remaining activities and queued activations while the loop
    /// is still the thread-current one, so cleanup guards can reach it.
    fn shutdown(&self) {
        loop {
            // drain outside the borrow: dropping a future may close or
            // spawn activities through this very table
            let slots: Vec<Slot> = {
                let mut table = self.table.borrow_mut();
                let drained: Vec<Slot> = table.drain().map(|(_, slot)| slot).collect();
                drained
            };
            if slots.is_empty() {
                break;
            }
            drop(slots);
        }
        let mut sched = self.sched.borrow_mut();
        sched.pending.clear();
        while sched.queued.pop().is_some() {}
    }
}

/// Run a simulation with a single root activity, starting at time `0`.
pub fn run<F>(activity: F) -> Result<(), KernelError>
where
    F: std::future::Future<Output = SimResult<()>> + 'static,
{
    run_from(0.0, [activity.boxed_local()])
}

/// Run a simulation from the given root activities at time `start` until no
/// activation remains.
pub fn run_from<I>(start: Time, activities: I) -> Result<(), KernelError>
where
    I: IntoIterator<Item = LocalBoxFuture<'static, SimResult<()>>>,
{
    let queued = WaitQueue::from_env()?;
    let core = Rc::new(Loop::new(start, queued));
    for (index, activity) in activities.into_iter().enumerate() {
        let weak = Rc::downgrade(&core);
        let label = format!("root-activity-{index}");
        let wrapped = async move {
            match activity.await {
                Ok(()) => {}
                Err(Abort::Failed(cause)) => {
                    if let Some(core) = weak.upgrade() {
                        core.set_fault(KernelError::ActivityError {
                            activity: label,
                            cause,
                        });
                    }
                }
                Err(Abort::Interrupted(interrupt)) => {
                    if let Some(core) = weak.upgrade() {
                        core.set_fault(KernelError::ActivityLeak {
                            activity: label,
                            interrupt: interrupt.to_string(),
                        });
                    }
                }
            }
        }
        .boxed_local();
        let id = core.insert(wrapped);
        core.sched.borrow_mut().pending.push_back(Activation {
            target: id,
            signal: None,
        });
    }
    debug!(start, "simulation started");
    let guard = handler::enter(Rc::clone(&core));
    let result = core.run_events();
    core.shutdown();
    drop(guard);
    debug!(ok = result.is_ok(), "simulation finished");
    result
}
