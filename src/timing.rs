//! Virtual time: the clock, delays, and time conditions
//!
//! There is no inherent time unit implied for simulation time; a simulation
//! should use a consistent one. Due to the nature of simulated time there is
//! only "directly after" any specific point in time, but not "directly
//! before": awaitable conditions exist for "strictly before" ([`Before`]),
//! "at or after" ([`After`]) and "exactly at" ([`Moment`]) a target time.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use futures::FutureExt;

use crate::condition::{waitpoint_via_cond, Cond, ConditionNode, WaitMode, WaitPoint};
use crate::core::event_loop::{ActivityId, Interrupt, ScheduleAt, Stamp, Time};
use crate::core::handler;
use crate::error::SimResult;
use crate::notify::Notification;
use crate::suspend::suspend_for;

/// Access to the ongoing simulation's time.
///
/// All accessors require an active simulation on the current thread.
pub struct Clock;

impl Clock {
    /// The current simulation time.
    pub fn now() -> Time {
        handler::with(|core| core.now())
    }

    /// The precise progress marker `(time, turn)`; mostly useful to assert
    /// postponement in tests.
    pub fn stamp() -> Stamp {
        handler::with(|core| core.stamp())
    }

    /// A one-shot relative delay (`time + duration`).
    pub fn delay(duration: Time) -> Delay {
        Delay { duration }
    }

    /// The condition `time == target`.
    pub fn at(target: Time) -> Moment {
        Moment {
            target,
            transition: After::new(target),
        }
    }

    /// The condition `time >= target` (inclusive of `target`).
    pub fn after(target: Time) -> After {
        After::new(target)
    }

    /// The condition `time < target` (exclusive of `target`).
    pub fn before(target: Time) -> Before {
        Before::new(target)
    }
}

/// A relative delay from the current time.
///
/// Awaiting schedules the waiter `duration` into the future; the duration
/// must be strictly positive.
#[derive(Debug, Clone, Copy)]
pub struct Delay {
    duration: Time,
}

impl Delay {
    /// Suspend for the delay's duration.
    pub async fn wait(&self) -> SimResult<()> {
        suspend_for(self.duration).await
    }
}

impl From<Delay> for WaitPoint {
    fn from(delay: Delay) -> Self {
        WaitPoint::from_delay(delay.duration)
    }
}

struct AfterCore {
    target: Time,
    waiters: Notification,
    armed: Cell<bool>,
}

/// The time range at and after a certain point in time.
///
/// On first subscription a one-shot trigger is armed at exactly the target
/// time; when it fires, all waiters are woken broadcast.
#[derive(Clone)]
pub struct After {
    core: Rc<AfterCore>,
}

impl After {
    fn new(target: Time) -> Self {
        Self {
            core: Rc::new(AfterCore {
                target,
                waiters: Notification::new("after"),
                armed: Cell::new(false),
            }),
        }
    }

    /// Arm the wake-up at the target time; idempotent.
    fn ensure_trigger(&self) {
        if self.core.armed.get() {
            return;
        }
        self.core.armed.set(true);
        let core = Rc::clone(&self.core);
        handler::with(|event_loop| {
            let trigger = async move {
                core.waiters.awake_all();
            }
            .boxed_local();
            event_loop.spawn(trigger, ScheduleAt::At(self.core.target));
        });
    }

    /// Suspend until the target time has been reached.
    pub async fn wait(&self) -> SimResult<()> {
        self.clone().cond().wait().await
    }

    fn cond(self) -> Cond {
        Cond::from(self)
    }
}

impl ConditionNode for After {
    fn probe(&self) -> bool {
        Clock::now() >= self.core.target
    }

    fn waiters(&self) -> &Notification {
        &self.core.waiters
    }

    fn invert(&self) -> Cond {
        Cond::from(Before::new(self.core.target))
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "time >= {}", self.core.target)
    }

    fn subscribe(&self, waiter: ActivityId, interrupt: Interrupt) {
        if !self.probe() {
            self.ensure_trigger();
            self.core.waiters.subscribe(waiter, interrupt);
        } else {
            // already reached: deliver within the current instant
            handler::with(|core| core.schedule(waiter, Some(interrupt), ScheduleAt::Now));
        }
    }
}

impl From<After> for Cond {
    fn from(after: After) -> Self {
        Cond::from_node(Rc::new(after))
    }
}

struct BeforeCore {
    target: Time,
    // nothing ever triggers a Before; subscribers park until interrupted
    waiters: Notification,
}

/// The time range strictly before a certain point in time.
///
/// Awaiting when already false hibernates forever: time alone never makes
/// this condition true again.
#[derive(Clone)]
pub struct Before {
    core: Rc<BeforeCore>,
}

impl Before {
    fn new(target: Time) -> Self {
        Self {
            core: Rc::new(BeforeCore {
                target,
                waiters: Notification::new("before"),
            }),
        }
    }

    /// Suspend once if the target has not been reached, forever otherwise.
    pub async fn wait(&self) -> SimResult<()> {
        Cond::from(self.clone()).wait().await
    }
}

impl ConditionNode for Before {
    fn probe(&self) -> bool {
        Clock::now() < self.core.target
    }

    fn waiters(&self) -> &Notification {
        &self.core.waiters
    }

    fn invert(&self) -> Cond {
        Cond::from(After::new(self.core.target))
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "time < {}", self.core.target)
    }

    fn wait_mode(&self) -> WaitMode {
        WaitMode::Never
    }
}

impl From<Before> for Cond {
    fn from(before: Before) -> Self {
        Cond::from_node(Rc::new(before))
    }
}

/// A certain point in time.
///
/// Reached by waiting for the [`After`] transition of the target and
/// resuming within the same instant. Its inversion ("not this instant") is
/// undefined and fails fast.
#[derive(Clone)]
pub struct Moment {
    target: Time,
    transition: After,
}

impl Moment {
    /// Suspend until exactly the target time; never triggers in the past.
    pub async fn wait(&self) -> SimResult<()> {
        Cond::from(self.clone()).wait().await
    }
}

impl ConditionNode for Moment {
    fn probe(&self) -> bool {
        Clock::now() == self.target
    }

    fn waiters(&self) -> &Notification {
        self.transition.waiters()
    }

    fn invert(&self) -> Cond {
        panic!("the inversion of a moment in time is undefined");
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "time == {}", self.target)
    }

    fn wait_mode(&self) -> WaitMode {
        if Clock::now() < self.target {
            WaitMode::Leaf
        } else {
            WaitMode::Never
        }
    }

    fn subscribe(&self, waiter: ActivityId, interrupt: Interrupt) {
        self.transition.subscribe(waiter, interrupt);
    }

    fn unsubscribe(&self, waiter: ActivityId, interrupt: &Interrupt) {
        self.transition.unsubscribe(waiter, interrupt);
    }
}

impl From<Moment> for Cond {
    fn from(moment: Moment) -> Self {
        Cond::from_node(Rc::new(moment))
    }
}

/// A future point in time indistinguishable from the current one.
///
/// Awaiting postpones exactly once.
pub struct Instant {
    waiters: Notification,
}

impl Instant {
    pub fn new() -> Self {
        Self {
            waiters: Notification::new("instant"),
        }
    }

    pub async fn wait(&self) -> SimResult<()> {
        crate::suspend::postpone().await
    }
}

impl Default for Instant {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionNode for Instant {
    fn probe(&self) -> bool {
        true
    }

    fn waiters(&self) -> &Notification {
        &self.waiters
    }

    fn invert(&self) -> Cond {
        Cond::from(Eternity::new())
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instant")
    }

    fn wait_mode(&self) -> WaitMode {
        WaitMode::Never
    }
}

impl From<Instant> for Cond {
    fn from(instant: Instant) -> Self {
        Cond::from_node(Rc::new(instant))
    }
}

/// A point in time infinitely far into the future.
///
/// Awaiting hibernates forever; only a foreign interrupt resumes the waiter.
pub struct Eternity {
    waiters: Notification,
}

impl Eternity {
    pub fn new() -> Self {
        Self {
            waiters: Notification::new("eternity"),
        }
    }

    pub async fn wait(&self) -> SimResult<()> {
        Cond::from(Eternity::new()).wait().await
    }
}

impl Default for Eternity {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionNode for Eternity {
    fn probe(&self) -> bool {
        false
    }

    fn waiters(&self) -> &Notification {
        &self.waiters
    }

    fn invert(&self) -> Cond {
        Cond::from(Instant::new())
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eternity")
    }

    fn wait_mode(&self) -> WaitMode {
        WaitMode::Never
    }
}

impl From<Eternity> for Cond {
    fn from(eternity: Eternity) -> Self {
        Cond::from_node(Rc::new(eternity))
    }
}

waitpoint_via_cond!(Moment, After, Before, Instant, Eternity);

/// Ticks spaced a fixed delay apart, measured from each iteration.
pub struct DelayTicks {
    delay: Time,
}

/// Ticks aligned to fixed interval boundaries from the first call.
pub struct IntervalTicks {
    interval: Time,
    last: Option<Time>,
}

/// An infinite sequence of wake-ups spaced `delay` apart from the current
/// time at each iteration.
pub fn each_delay(delay: Time) -> DelayTicks {
    DelayTicks { delay }
}

/// An infinite sequence of wake-ups at `k * interval` boundaries anchored to
/// the first call, regardless of consumer speed.
pub fn each_interval(interval: Time) -> IntervalTicks {
    IntervalTicks {
        interval,
        last: None,
    }
}

impl DelayTicks {
    /// Suspend until the next tick and return its time.
    pub async fn next(&mut self) -> SimResult<Time> {
        suspend_for(self.delay).await?;
        Ok(Clock::now())
    }
}

impl IntervalTicks {
    /// Suspend until the next boundary and return its time.
    ///
    /// When the consumer overran the interval, the iterator re-anchors to
    /// the next boundary at or after the current time; skipped boundaries
    /// are not emitted.
    pub async fn next(&mut self) -> SimResult<Time> {
        let now = Clock::now();
        let mut target = match self.last {
            None => now,
            Some(last) => last + self.interval,
        };
        while target < now {
            target += self.interval;
        }
        Clock::at(target).wait().await?;
        let reached = Clock::now();
        self.last = Some(reached);
        Ok(reached)
    }
}
