//! Discrete-event simulation kernel over virtual time
//!
//! This crate provides a cooperative scheduler on which activities progress
//! by suspending on simulated delays, boolean conditions derived from
//! tracked state, and synchronization primitives:
//! - An event loop with logical time and an interrupt-based
//!   suspension/resumption protocol
//! - Notifications and composable conditions, including time conditions
//!   and tracked-value comparisons
//! - Structured concurrency: scopes owning tasks, with cancellation and
//!   multi-failure aggregation
//! - Resource primitives: reentrant locks, queues and broadcast channels,
//!   borrowable resource supplies, throughput-throttling pipes
//!
//! The kernel runs entirely in-memory, produces no wall-clock effects, and
//! never runs two activities simultaneously: all concurrency is
//! interleaving at well-defined suspension points.
//!
//! ```ignore
//! use chronoflow::{each_delay, run, until, Clock};
//!
//! run(async {
//!     // tick every time unit until the simulation reaches t=5
//!     until(Clock::at(5.0), |_scope| async move {
//!         let mut ticks = each_delay(1.0);
//!         loop {
//!             let now = ticks.next().await?;
//!             println!("tick at {now}");
//!         }
//!     })
//!     .await?;
//!     Ok(())
//! })?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod concurrent;
pub mod condition;
mod core;
pub mod error;
pub mod flag;
pub mod flow;
pub mod lock;
mod notify;
pub mod resources;
pub mod scope;
pub mod suspend;
pub mod task;
pub mod timing;

pub use concurrent::{Concurrent, FailureSpec};
pub use condition::{Cond, WaitPoint};
pub use crate::core::event_loop::{run, run_from, Interrupt, Stamp, Time};
pub use crate::core::handler::is_active;
pub use crate::core::waitq::WAITQUEUE_KEY;
pub use error::{
    Abort, KernelError, ResourcesUnavailable, SimResult, StreamClosed, TaskCancelled,
    TaskClosed, VolatileTaskClosed,
};
pub use flag::Flag;
pub use flow::{collect, first, race};
pub use lock::{Lock, LockGuard};
pub use resources::levels::ResourceLevels;
pub use resources::pipe::{Pipe, UnboundedPipe};
pub use resources::pool::{Borrowed, Capacities, Resources};
pub use resources::streams::{Channel, ChannelReader, Queue};
pub use resources::tracked::{Cmp, IntoOperand, Operand, Tracked, Watch};
pub use scope::{until, Scope};
pub use suspend::{postpone, suspend_for, suspend_until};
pub use task::{Start, Task, TaskState};
pub use timing::{
    each_delay, each_interval, After, Before, Clock, Delay, DelayTicks, Eternity, Instant,
    IntervalTicks, Moment,
};

/// Box an activity for APIs taking heterogeneous sets of activities, such
/// as [`run_from`], [`collect`] and [`race`].
pub fn boxed<F, R>(activity: F) -> futures::future::LocalBoxFuture<'static, SimResult<R>>
where
    F: std::future::Future<Output = SimResult<R>> + 'static,
{
    Box::pin(activity)
}
