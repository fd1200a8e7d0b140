//! Kernel-level suspension primitives
//!
//! All higher-level waiting is built from one idiom: schedule a wake-up
//! interrupt for yourself, hibernate, and revoke the wake-up on exit so a
//! stale activation becomes a no-op. A foreign interrupt arriving first is
//! re-raised as [`Abort::Interrupted`] after the own wake-up is revoked.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::core::event_loop::{ActivityId, Interrupt, ScheduleAt, Time};
use crate::core::handler;
use crate::error::{Abort, SimResult};

/// Park the current activity until the next activation, yielding the
/// delivered interrupt (if any).
///
/// This does *not* schedule a resumption by itself; callers must arrange one
/// first or the activity sleeps forever.
pub(crate) struct Hibernate {
    parked: bool,
}

pub(crate) fn hibernate() -> Hibernate {
    Hibernate { parked: false }
}

impl Future for Hibernate {
    type Output = Option<Interrupt>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.parked {
            self.parked = true;
            return Poll::Pending;
        }
        let delivered = handler::with(|core| {
            let id = core.current_activity();
            core.take_delivery(id)
        });
        if let Some(signal) = &delivered {
            signal.mark_consumed();
        }
        Poll::Ready(delivered)
    }
}

fn current_activity() -> ActivityId {
    handler::with(|core| core.current_activity())
}

/// Hibernate after arming `wake_up` at `when`, resolving which interrupt
/// actually arrived. The wake-up is revoked on every exit path.
pub(crate) async fn wake_or_interrupt(
    reason: &'static str,
    when: ScheduleAt,
) -> SimResult<()> {
    let me = current_activity();
    let wake_up = Interrupt::wake(reason);
    handler::with(|core| core.schedule(me, Some(wake_up.clone()), when));
    let delivered = hibernate().await;
    wake_up.revoke();
    match delivered {
        Some(signal) if signal.is(&wake_up) => Ok(()),
        Some(foreign) => {
            debug_assert!(
                current_activity() == me,
                "break points cannot be passed between activities"
            );
            Err(Abort::Interrupted(foreign))
        }
        None => Ok(()),
    }
}

/// Requeue the current activity within the current instant.
///
/// The minimum yield point: other activities get to run and interrupts get
/// to occur before execution resumes at the same virtual time.
pub async fn postpone() -> SimResult<()> {
    wake_or_interrupt("postpone", ScheduleAt::Now).await
}

/// Suspend the current activity for a strictly positive `delay`.
pub async fn suspend_for(delay: Time) -> SimResult<()> {
    wake_or_interrupt("suspend", ScheduleAt::Delay(delay)).await
}

/// Suspend the current activity until the absolute time `at`, which must be
/// strictly in the future.
pub async fn suspend_until(at: Time) -> SimResult<()> {
    wake_or_interrupt("suspend", ScheduleAt::At(at)).await
}
