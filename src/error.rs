//! Error taxonomy of the simulation kernel
//!
//! Three lineages are kept strictly apart:
//! - **Kernel faults** ([`KernelError`]): unrecoverable, abort the simulation
//!   and propagate out of [`run`](crate::run).
//! - **Kernel interrupts** ([`Abort::Interrupted`]): privileged control-flow
//!   signals (wake-ups, cancellations) re-raised at suspension points. They
//!   are not `std::error::Error`s, so user error handling can never swallow
//!   them by accident.
//! - **Failures** ([`Abort::Failed`]): ordinary user-level errors, carried as
//!   type-erased [`anyhow::Error`] values shared between a task's observers
//!   and its parent scope.

use std::fmt;
use std::sync::Arc;

use crate::core::event_loop::Interrupt;

/// Result type threaded through every suspension point.
pub type SimResult<T> = Result<T, Abort>;

/// Why an `await` inside an activity did not run to completion.
///
/// Suspension primitives return `Err(Abort::Interrupted(..))` when a foreign
/// interrupt (typically a cancellation) arrives instead of the expected
/// wake-up; user code propagates it with `?`. `Err(Abort::Failed(..))`
/// carries an ordinary failure raised by user code or a kernel primitive.
pub enum Abort {
    /// A kernel interrupt was delivered at the suspension point.
    Interrupted(Interrupt),
    /// An ordinary failure; shared so that a task's result and its parent
    /// scope's aggregation refer to the same underlying error.
    Failed(Arc<anyhow::Error>),
}

impl Abort {
    /// Wrap a failure value.
    pub fn failed<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Abort::Failed(Arc::new(anyhow::Error::new(error)))
    }

    /// The interrupt carried by this abort, if any.
    pub fn interrupt(&self) -> Option<&Interrupt> {
        match self {
            Abort::Interrupted(interrupt) => Some(interrupt),
            Abort::Failed(_) => None,
        }
    }

    /// Whether this abort carries a failure of concrete type `E`.
    pub fn failure_is<E>(&self) -> bool
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match self {
            Abort::Failed(error) => error.is::<E>(),
            Abort::Interrupted(_) => false,
        }
    }

    /// Downcast the carried failure to a concrete error type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match self {
            Abort::Failed(error) => error.downcast_ref::<E>(),
            Abort::Interrupted(_) => None,
        }
    }
}

impl fmt::Debug for Abort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Abort::Interrupted(interrupt) => write!(f, "Interrupted({interrupt})"),
            Abort::Failed(error) => write!(f, "Failed({error:?})"),
        }
    }
}

impl fmt::Display for Abort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Abort::Interrupted(interrupt) => write!(f, "interrupted by {interrupt}"),
            Abort::Failed(error) => write!(f, "{error}"),
        }
    }
}

impl<E> From<E> for Abort
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Abort::Failed(Arc::new(anyhow::Error::new(error)))
    }
}

/// Fatal faults of the event loop itself.
///
/// These abort the simulation immediately and propagate from
/// [`run`](crate::run); they are never seen inside activities.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// A root activity escaped with an unhandled failure.
    #[error("activity '{activity}' failed with an unhandled error: {cause}")]
    ActivityError {
        activity: String,
        cause: Arc<anyhow::Error>,
    },
    /// A root activity leaked a kernel interrupt past its outermost frame.
    #[error("activity '{activity}' leaked uncontained output: {interrupt}")]
    ActivityLeak { activity: String, interrupt: String },
    /// The wait-queue selector carried a value outside the enumerated set.
    #[error("invalid {key}={value:?}: expected one of \"\", \"heap\", \"sorted\"")]
    InvalidWaitQueue { key: &'static str, value: String },
}

/// A task was cancelled before completion.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{subject} was cancelled: {token}")]
pub struct TaskCancelled {
    /// Description of the cancelled task.
    pub subject: String,
    /// Token given at the cancellation site.
    pub token: String,
}

/// A task was forcefully closed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TaskClosed(pub String);

/// A volatile task was forcefully closed at the end of its scope.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct VolatileTaskClosed(pub String);

/// Resources requested from a supply are not available right now.
///
/// Raised only by `claim`; `borrow` waits instead.
#[derive(Debug, Clone, thiserror::Error)]
#[error("cannot claim {request} from {pool}: insufficient levels")]
pub struct ResourcesUnavailable {
    /// The pool the claim was made against.
    pub pool: String,
    /// The requested amounts.
    pub request: String,
}

/// A stream was closed and cannot provide more messages.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{stream} is closed and cannot provide more messages")]
pub struct StreamClosed {
    /// Description of the closed stream.
    pub stream: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_downcast_roundtrip() {
        let abort = Abort::failed(StreamClosed {
            stream: "queue".into(),
        });
        assert!(abort.failure_is::<StreamClosed>());
        assert!(!abort.failure_is::<TaskClosed>());
        let inner = abort.downcast_ref::<StreamClosed>().map(|e| e.stream.clone());
        assert_eq!(inner.as_deref(), Some("queue"));
    }

    #[test]
    fn question_mark_conversion_from_std_errors() {
        fn failing() -> SimResult<()> {
            Err(TaskClosed("task closed for test".into()))?;
            Ok(())
        }
        let abort = failing().unwrap_err();
        assert!(abort.failure_is::<TaskClosed>());
    }
}
