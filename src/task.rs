//! Observable concurrent tasks
//!
//! A [`Task`] wraps a payload activity branched off in a
//! [`Scope`](crate::scope::Scope). The handle can be stored and passed
//! around to await the result, query the status, or cancel the payload;
//! awaiting a finished task re-raises its stored failure.
//!
//! Tasks are created by scopes, never directly.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use anyhow::anyhow;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use tracing::trace;

use crate::condition::Cond;
use crate::core::event_loop::{next_serial, ActivityId, Interrupt, ScheduleAt, Time};
use crate::core::handler;
use crate::error::{Abort, SimResult, TaskCancelled};
use crate::flag::Flag;
use crate::scope::ScopeCore;
use crate::suspend::{suspend_for, suspend_until};

/// State of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created but not running yet.
    Created,
    /// Started and not yet finished.
    Running,
    /// Finished due to cancellation or forced closure.
    Cancelled,
    /// Finished due to an unhandled failure.
    Failed,
    /// Finished normally.
    Success,
}

impl TaskState {
    /// Whether the task finished by any means.
    pub fn finished(self) -> bool {
        matches!(
            self,
            TaskState::Cancelled | TaskState::Failed | TaskState::Success
        )
    }
}

/// When a spawned task starts running.
#[derive(Debug, Clone, Copy)]
pub enum Start {
    /// Within the current instant.
    Now,
    /// After a strictly positive delay.
    After(Time),
    /// At an absolute time strictly in the future.
    At(Time),
}

pub(crate) struct TaskCore<R> {
    serial: u64,
    label: String,
    activity: Cell<Option<ActivityId>>,
    started: Cell<bool>,
    /// `Ok(None)` means the result value has been consumed by `join`.
    outcome: RefCell<Option<Result<Option<R>, Arc<anyhow::Error>>>>,
    done: Flag,
    cancellations: RefCell<Vec<Interrupt>>,
    parent: Weak<ScopeCore>,
}

impl<R> TaskCore<R> {
    fn finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    fn record(&self, outcome: Result<R, Arc<anyhow::Error>>) {
        *self.outcome.borrow_mut() = Some(outcome.map(Some));
    }

    fn revoke_cancellations(&self) {
        for cancellation in self.cancellations.borrow_mut().drain(..) {
            cancellation.revoke();
        }
    }
}

/// Type-erased control surface a scope keeps for each child.
pub(crate) trait TaskControl {
    fn state(&self) -> TaskState;
    fn failure(&self) -> Option<Arc<anyhow::Error>>;
    fn done_cond(&self) -> Cond;
    /// Forcefully terminate the payload; no further suspension happens.
    fn force_close(&self, reason: Arc<anyhow::Error>);
}

impl<R: 'static> TaskControl for TaskCore<R> {
    fn state(&self) -> TaskState {
        match self.outcome.borrow().as_ref() {
            Some(Ok(_)) => TaskState::Success,
            Some(Err(failure)) => {
                if failure.is::<TaskCancelled>()
                    || failure.is::<crate::error::TaskClosed>()
                    || failure.is::<crate::error::VolatileTaskClosed>()
                {
                    TaskState::Cancelled
                } else {
                    TaskState::Failed
                }
            }
            None => {
                if self.started.get() {
                    TaskState::Running
                } else {
                    TaskState::Created
                }
            }
        }
    }

    fn failure(&self) -> Option<Arc<anyhow::Error>> {
        match self.outcome.borrow().as_ref() {
            Some(Err(failure)) => Some(Arc::clone(failure)),
            _ => None,
        }
    }

    fn done_cond(&self) -> Cond {
        self.done.cond()
    }

    fn force_close(&self, reason: Arc<anyhow::Error>) {
        if self.finished() {
            return;
        }
        trace!(task = %self.label, "force close");
        *self.outcome.borrow_mut() = Some(Err(reason));
        if self.started.get() {
            // drop the parked payload; its guards clean up now
            if let Some(activity) = self.activity.get() {
                handler::try_with(|core| core.close_activity(activity));
            }
        }
        self.revoke_cancellations();
        self.done.force_set();
    }
}

/// Handle to a concurrently running activity.
pub struct Task<R> {
    core: Rc<TaskCore<R>>,
}

impl<R> Clone for Task<R> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<R: 'static> Task<R> {
    /// The current status of this task.
    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    /// Condition that holds once the task has stopped running, whether by
    /// completion, cancellation or failure. `!task.done()` holds while the
    /// task is still outstanding.
    pub fn done(&self) -> Cond {
        self.core.done.cond()
    }

    /// Wait for completion and take the result.
    ///
    /// Re-raises the stored failure, including [`TaskCancelled`]. The result
    /// value itself can be taken only once; failures re-raise on every call.
    pub async fn join(&self) -> SimResult<R> {
        self.done().wait().await?;
        let mut outcome = self.core.outcome.borrow_mut();
        match outcome.as_mut() {
            Some(Ok(slot)) => match slot.take() {
                Some(value) => Ok(value),
                None => Err(Abort::Failed(Arc::new(anyhow!(
                    "result of {} was already consumed",
                    self.core.label
                )))),
            },
            Some(Err(failure)) => Err(Abort::Failed(Arc::clone(failure))),
            None => {
                debug_assert!(false, "done task without recorded outcome");
                Err(Abort::Failed(Arc::new(anyhow!(
                    "{} finished without recording an outcome",
                    self.core.label
                ))))
            }
        }
    }

    /// Cancel this task within the current time step.
    ///
    /// A running task receives the cancellation at its next suspension; a
    /// task that has not started yet transitions to `Cancelled` without ever
    /// running. Cancelling is idempotent: only the first successful
    /// cancellation is stored as the cause, and a finished task ignores it.
    pub fn cancel(&self) {
        self.cancel_with("task.cancel()");
    }

    /// Cancel with a token naming the cancellation site.
    pub fn cancel_with(&self, token: &str) {
        if self.core.finished() {
            return;
        }
        if !self.core.started.get() {
            self.core.record(Err(Arc::new(anyhow::Error::new(TaskCancelled {
                subject: self.core.label.clone(),
                token: token.to_string(),
            }))));
            self.core.done.force_set();
            return;
        }
        let cancellation = Interrupt::cancel_task(self.core.serial, token.to_string());
        self.core
            .cancellations
            .borrow_mut()
            .push(cancellation.clone());
        if let Some(activity) = self.core.activity.get() {
            handler::with(|core| {
                core.schedule(activity, Some(cancellation), ScheduleAt::Now);
            });
        }
    }

    pub(crate) fn control(&self) -> Rc<dyn TaskControl> {
        self.core.clone()
    }
}

impl<R> std::fmt::Debug for Task<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}, outcome recorded={}>", self.core.label, self.core.finished())
    }
}

/// Wrap a payload into a runner activity and schedule its first activation.
pub(crate) fn launch_task<R: 'static>(
    payload: LocalBoxFuture<'static, SimResult<R>>,
    parent: &Rc<ScopeCore>,
    start: Start,
) -> Task<R> {
    let serial = next_serial();
    let core = Rc::new(TaskCore {
        serial,
        label: format!("task-{serial}"),
        activity: Cell::new(None),
        started: Cell::new(false),
        outcome: RefCell::new(None),
        done: Flag::new(),
        cancellations: RefCell::new(Vec::new()),
        parent: Rc::downgrade(parent),
    });
    let runner = {
        let core = Rc::clone(&core);
        async move {
            if core.finished() {
                // cancelled before ever running
                return;
            }
            core.started.set(true);
            let result: SimResult<R> = async {
                match start {
                    Start::Now => {}
                    Start::After(delay) => suspend_for(delay).await?,
                    Start::At(at) => suspend_until(at).await?,
                }
                payload.await
            }
            .await;
            let cancellation_suppressed = matches!(&result, Ok(_))
                && core
                    .cancellations
                    .borrow()
                    .iter()
                    .any(Interrupt::consumed);
            let stored: Result<R, Arc<anyhow::Error>> = match result {
                Ok(_) if cancellation_suppressed => Err(Arc::new(anyhow!(
                    "{} suppressed its cancellation instead of re-raising it",
                    core.label
                ))),
                Ok(value) => Ok(value),
                Err(Abort::Interrupted(signal)) if signal.cancels_task(core.serial) => {
                    let token = signal.cancellation_token().unwrap_or_default().to_string();
                    Err(Arc::new(anyhow::Error::new(TaskCancelled {
                        subject: core.label.clone(),
                        token,
                    })))
                }
                Err(Abort::Interrupted(signal)) => {
                    debug_assert!(
                        !signal.is_task_cancellation(),
                        "{} received a cancellation routed to a different task",
                        core.label
                    );
                    if let Some(parent) = core.parent.upgrade() {
                        parent.request_cancel();
                    }
                    Err(Arc::new(anyhow!(
                        "{} was terminated by a stray interrupt: {signal}",
                        core.label
                    )))
                }
                Err(Abort::Failed(failure)) => {
                    if let Some(parent) = core.parent.upgrade() {
                        parent.request_cancel();
                    }
                    Err(failure)
                }
            };
            core.record(stored);
            core.revoke_cancellations();
            core.done.force_set();
        }
        .boxed_local()
    };
    let activity = handler::with(|event_loop| event_loop.spawn(runner, ScheduleAt::Now));
    core.activity.set(Some(activity));
    Task { core }
}
