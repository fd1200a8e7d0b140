//! Structured concurrency scopes
//!
//! A [`Scope`] owns a set of child tasks. Its block and all children form
//! one unit of control: the scope only exits once its body and every
//! non-volatile child are done. Volatile children are forcibly closed at
//! the end of the scope instead.
//!
//! Failures of children abort the scope and are collapsed into a single
//! [`Concurrent`] failure. Panics are never collapsed; they unwind through
//! the simulation unwrapped.
//!
//! [`until`] opens a scope that is cancelled cleanly when a condition (or
//! delay) fires; the cancellation is suppressed at the scope boundary.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use anyhow::anyhow;
use futures::FutureExt;
use tracing::trace;

use crate::concurrent::Concurrent;
use crate::condition::{Cond, WaitPoint};
use crate::core::event_loop::{next_serial, ActivityId, Interrupt, ScheduleAt, Time};
use crate::core::handler;
use crate::error::{Abort, SimResult, TaskClosed, VolatileTaskClosed};
use crate::flag::Flag;
use crate::task::{launch_task, Start, Task, TaskControl, TaskState};
use crate::timing::Clock;

pub(crate) struct ScopeCore {
    serial: u64,
    children: RefCell<Vec<Rc<dyn TaskControl>>>,
    volatile: RefCell<Vec<Rc<dyn TaskControl>>>,
    /// The scope body has finished and the exit protocol has begun.
    body_done: Flag,
    /// Whether the scope can still be cancelled asynchronously.
    interruptable: Cell<bool>,
    activity: Cell<Option<ActivityId>>,
    cancel_self: RefCell<Option<Interrupt>>,
    /// Subscription of an `until` scope, released on exit.
    watched: RefCell<Option<(WaitPoint, Interrupt)>>,
}

impl ScopeCore {
    fn new() -> Self {
        Self {
            serial: next_serial(),
            children: RefCell::new(Vec::new()),
            volatile: RefCell::new(Vec::new()),
            body_done: Flag::new(),
            interruptable: Cell::new(true),
            activity: Cell::new(None),
            cancel_self: RefCell::new(None),
            watched: RefCell::new(None),
        }
    }

    /// Cancel this scope within the current instant, if still allowed.
    pub(crate) fn request_cancel(&self) {
        if !self.interruptable.get() {
            return;
        }
        let cancel = self.cancel_self.borrow().clone();
        if let (Some(activity), Some(cancel)) = (self.activity.get(), cancel) {
            trace!(scope = self.serial, "cancel requested");
            handler::try_with(|core| {
                core.schedule(activity, Some(cancel), ScheduleAt::Now);
            });
        }
    }

    fn disable_interrupts(&self) {
        self.interruptable.set(false);
        if let Some(cancel) = self.cancel_self.borrow().as_ref() {
            cancel.revoke();
        }
        if let Some((point, interrupt)) = self.watched.borrow_mut().take() {
            if let Some(activity) = self.activity.get() {
                point.unsubscribe(activity, &interrupt);
            }
        }
    }

    fn close_children(&self) {
        let reason = Arc::new(anyhow::Error::new(TaskClosed(format!(
            "task closed at end of scope-{}",
            self.serial
        ))));
        let snapshot: Vec<Rc<dyn TaskControl>> = self.children.borrow().clone();
        for child in snapshot {
            child.force_close(Arc::clone(&reason));
        }
    }

    fn close_volatile(&self) {
        let reason = Arc::new(anyhow::Error::new(VolatileTaskClosed(format!(
            "volatile task closed at end of scope-{}",
            self.serial
        ))));
        let snapshot: Vec<Rc<dyn TaskControl>> = self.volatile.borrow().clone();
        for child in snapshot {
            child.force_close(Arc::clone(&reason));
        }
    }
}

/// Concurrency scope for branching off and waiting for activities.
///
/// Opened with [`Scope::enter`] or [`until`]; the handle may be cloned and
/// passed around freely, most importantly into child activities, which can
/// then spawn siblings or await the scope's end.
#[derive(Clone)]
pub struct Scope {
    core: Rc<ScopeCore>,
}

impl Scope {
    /// Open a scope around `body` and run it to completion.
    ///
    /// Returns the body's value once the body and all non-volatile children
    /// are done. Child failures are re-raised as a single [`Concurrent`].
    pub async fn enter<F, Fut, R>(body: F) -> SimResult<R>
    where
        F: FnOnce(Scope) -> Fut,
        Fut: std::future::Future<Output = SimResult<R>>,
    {
        match enter_watched(None, body).await? {
            Some(value) => Ok(value),
            None => Err(Abort::Failed(Arc::new(anyhow!(
                "scope was cancelled without a recorded cause"
            )))),
        }
    }

    /// Concurrently perform an activity in this scope.
    pub fn spawn<F, R>(&self, payload: F) -> Task<R>
    where
        F: std::future::Future<Output = SimResult<R>> + 'static,
        R: 'static,
    {
        self.launch(payload, Start::Now, false)
    }

    /// Spawn a child that starts after a strictly positive delay.
    pub fn spawn_after<F, R>(&self, delay: Time, payload: F) -> Task<R>
    where
        F: std::future::Future<Output = SimResult<R>> + 'static,
        R: 'static,
    {
        self.launch(payload, Start::After(delay), false)
    }

    /// Spawn a child that starts at an absolute future time.
    pub fn spawn_at<F, R>(&self, at: Time, payload: F) -> Task<R>
    where
        F: std::future::Future<Output = SimResult<R>> + 'static,
        R: 'static,
    {
        self.launch(payload, Start::At(at), false)
    }

    /// Spawn a child that is forcibly closed when the scope ends.
    pub fn spawn_volatile<F, R>(&self, payload: F) -> Task<R>
    where
        F: std::future::Future<Output = SimResult<R>> + 'static,
        R: 'static,
    {
        self.launch(payload, Start::Now, true)
    }

    /// Spawn with explicit start and volatility.
    pub fn launch<F, R>(&self, payload: F, start: Start, volatile: bool) -> Task<R>
    where
        F: std::future::Future<Output = SimResult<R>> + 'static,
        R: 'static,
    {
        match start {
            Start::Now => {}
            Start::After(delay) => {
                assert!(delay > 0.0, "schedule date must not be in the past")
            }
            Start::At(at) => {
                assert!(at > Clock::now(), "schedule date must not be in the past")
            }
        }
        let task = launch_task(payload.boxed_local(), &self.core, start);
        if volatile {
            self.core.volatile.borrow_mut().push(task.control());
        } else {
            self.core.children.borrow_mut().push(task.control());
        }
        task
    }

    /// Condition that holds once the scope's body has finished, whether
    /// gracefully or forcefully.
    pub fn finished(&self) -> Cond {
        self.core.body_done.cond()
    }

    /// Wait for the end of the scope's body. Children may use this to shut
    /// down gracefully together with their scope.
    pub async fn join(&self) -> SimResult<()> {
        self.core.body_done.cond().wait().await
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<scope-{}, children={}, volatile={}, done={}>",
            self.core.serial,
            self.core.children.borrow().len(),
            self.core.volatile.borrow().len(),
            self.core.body_done.is_set(),
        )
    }
}

/// Scope that is cancelled cleanly when `watch` fires.
///
/// The subscription listens on any break point, both inside the body and
/// while waiting for children. Returns `Ok(Some(value))` when the body ran
/// to completion and `Ok(None)` when the scope was interrupted; a break
/// point in the body is always required, even when `watch` would trigger
/// immediately.
pub async fn until<W, F, Fut, R>(watch: W, body: F) -> SimResult<Option<R>>
where
    W: Into<WaitPoint>,
    F: FnOnce(Scope) -> Fut,
    Fut: std::future::Future<Output = SimResult<R>>,
{
    enter_watched(Some(watch.into()), body).await
}

async fn enter_watched<F, Fut, R>(watch: Option<WaitPoint>, body: F) -> SimResult<Option<R>>
where
    F: FnOnce(Scope) -> Fut,
    Fut: std::future::Future<Output = SimResult<R>>,
{
    let me = handler::with(|core| core.current_activity());
    let core = Rc::new(ScopeCore::new());
    core.activity.set(Some(me));
    *core.cancel_self.borrow_mut() = Some(Interrupt::cancel_scope(core.serial));
    if let Some(point) = watch {
        let interrupt = Interrupt::cancel_scope(core.serial);
        point.subscribe(me, interrupt.clone());
        *core.watched.borrow_mut() = Some((point, interrupt));
    }
    let guard = ScopeGuard {
        core: Rc::clone(&core),
        armed: Cell::new(true),
    };
    let outcome = body(Scope {
        core: Rc::clone(&core),
    })
    .await;
    guard.disarm();
    match outcome {
        Ok(value) => {
            // announce the shutdown; any cancellation may still arrive here
            let exit = match core.body_done.set().await {
                Ok(()) => exit_graceful(&core).await,
                Err(abort) => finish_forceful(&core, abort),
            };
            exit.map(|()| Some(value))
        }
        Err(abort) => {
            core.body_done.force_set();
            finish_forceful(&core, abort).map(|()| None)
        }
    }
}

/// Wait for all non-volatile children; any interrupt switches to the
/// forceful path.
async fn exit_graceful(core: &Rc<ScopeCore>) -> SimResult<()> {
    match await_children(core).await {
        Ok(()) => {
            core.disable_interrupts();
            core.close_volatile();
            propagate(core, None)
        }
        Err(abort) => finish_forceful(core, abort),
    }
}

/// Close all children without waiting for anything. No further interrupt
/// can occur during this shutdown.
fn finish_forceful(core: &Rc<ScopeCore>, abort: Abort) -> SimResult<()> {
    core.disable_interrupts();
    core.close_children();
    core.close_volatile();
    propagate(core, Some(abort))
}

async fn await_children(core: &Rc<ScopeCore>) -> SimResult<()> {
    // children may be spawned while waiting; index past the growing list
    let mut index = 0;
    loop {
        let child = {
            let children = core.children.borrow();
            match children.get(index) {
                Some(child) => Rc::clone(child),
                None => break,
            }
        };
        index += 1;
        child.done_cond().wait().await?;
    }
    Ok(())
}

/// Decide what the scope raises after shutdown.
///
/// The scope's own cancel-interrupt is suppressed; child failures are then
/// collapsed into a [`Concurrent`]. Any other body failure wins over child
/// failures. Cancelled and closed children are not failures and never
/// aggregated.
fn propagate(core: &Rc<ScopeCore>, body_abort: Option<Abort>) -> SimResult<()> {
    let suppressed = match &body_abort {
        None => true,
        Some(Abort::Interrupted(signal)) => signal.cancels_scope(core.serial),
        Some(Abort::Failed(_)) => false,
    };
    if !suppressed {
        return match body_abort {
            Some(abort) => Err(abort),
            None => Ok(()),
        };
    }
    let failures: Vec<Arc<anyhow::Error>> = core
        .children
        .borrow()
        .iter()
        .filter(|child| child.state() == TaskState::Failed)
        .filter_map(|child| child.failure())
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Abort::Failed(Arc::new(anyhow::Error::new(
            Concurrent::new(failures),
        ))))
    }
}

/// Force-closes the scope's children when the owning activity is dropped
/// mid-flight, e.g. because the scope's own task was forcibly closed.
struct ScopeGuard {
    core: Rc<ScopeCore>,
    armed: Cell<bool>,
}

impl ScopeGuard {
    fn disarm(&self) {
        self.armed.set(false);
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if !self.armed.get() {
            return;
        }
        self.core.disable_interrupts();
        self.core.close_children();
        self.core.close_volatile();
        self.core.body_done.force_set();
    }
}
