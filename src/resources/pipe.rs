//! Shared transport with a limited total throughput
//!
//! Activities transfer volumes through a [`Pipe`] at a desired throughput.
//! When the sum of desired throughputs exceeds the pipe's limit, every
//! in-flight transfer is scaled down proportionally: with demands
//! `d1..dk` against limit `C`, a transfer receives
//! `di * min(1, C / (d1 + .. + dk))`.
//!
//! Subscriber changes rebroadcast a congestion notification, forcing all
//! in-flight transfers to account for the window that just ended and to
//! recompute their share.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::error::{Abort, SimResult};
use crate::notify::{Notification, Subscription, Target};
use crate::suspend::{postpone, suspend_for};
use crate::timing::Clock;

struct PipeCore {
    throughput: f64,
    scale: Cell<f64>,
    subscriptions: RefCell<HashMap<u64, f64>>,
    next_subscriber: Cell<u64>,
    congested: Notification,
}

impl PipeCore {
    fn add_subscriber(&self, desired: f64) -> u64 {
        let id = self.next_subscriber.get();
        self.next_subscriber.set(id + 1);
        self.subscriptions.borrow_mut().insert(id, desired);
        self.throttle_subscribers();
        id
    }

    fn remove_subscriber(&self, id: u64) {
        self.subscriptions.borrow_mut().remove(&id);
        self.throttle_subscribers();
    }

    /// Recompute the proportional share; on change, interrupt all transfers
    /// so they account for the finished window.
    fn throttle_subscribers(&self) {
        let desired: f64 = self.subscriptions.borrow().values().sum();
        if desired > self.throughput {
            self.scale.set(self.throughput / desired);
            self.congested.awake_all();
        } else if self.scale.get() != 1.0 {
            self.scale.set(1.0);
            self.congested.awake_all();
        }
    }
}

/// Throughput-throttling transport over a fixed limit.
#[derive(Clone)]
pub struct Pipe {
    core: Rc<PipeCore>,
}

impl Pipe {
    /// A pipe with the given total throughput limit; must be positive and
    /// finite.
    pub fn new(throughput: f64) -> Self {
        assert!(
            throughput > 0.0 && throughput.is_finite(),
            "pipe throughput must be positive and finite"
        );
        Self {
            core: Rc::new(PipeCore {
                throughput,
                scale: Cell::new(1.0),
                subscriptions: RefCell::new(HashMap::new()),
                next_subscriber: Cell::new(0),
                congested: Notification::new("pipe congestion"),
            }),
        }
    }

    /// The pipe's total throughput limit.
    pub fn throughput(&self) -> f64 {
        self.core.throughput
    }

    /// Transfer `total` volume at up to the pipe's full throughput.
    pub async fn transfer(&self, total: f64) -> SimResult<()> {
        self.transfer_at(total, self.core.throughput).await
    }

    /// Wait until `total` volume has been transferred at a desired
    /// `throughput`, throttled by the pipe's current congestion.
    pub async fn transfer_at(&self, total: f64, throughput: f64) -> SimResult<()> {
        assert!(total >= 0.0, "transfer volume must not be negative");
        assert!(throughput > 0.0, "transfer throughput must be positive");
        let subscriber = self.core.add_subscriber(throughput);
        let result = self.run_transfer(total, throughput).await;
        self.core.remove_subscriber(subscriber);
        result
    }

    async fn run_transfer(&self, total: f64, throughput: f64) -> SimResult<()> {
        let mut transferred = 0.0;
        while transferred < total {
            let window_start = Clock::now();
            let window_throughput = throughput * self.core.scale.get();
            let delay = (total - transferred) / window_throughput;
            // wait for the remainder's duration, or for a congestion
            // change, whichever happens first
            let full_window = {
                let congestion = Subscription::attach(Target::Plain(&self.core.congested));
                let outcome = if delay > 0.0 {
                    suspend_for(delay).await
                } else {
                    postpone().await
                };
                match outcome {
                    Ok(()) => true,
                    Err(Abort::Interrupted(signal)) if congestion.owns(&signal) => false,
                    Err(other) => return Err(other),
                }
            };
            if full_window {
                // barring float imprecision the whole remainder went through
                transferred = total;
            }
            transferred += (Clock::now() - window_start) * window_throughput;
            trace!(transferred, total, "transfer window");
        }
        Ok(())
    }
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<pipe, throughput={}, subscribers={}>",
            self.core.throughput,
            self.core.subscriptions.borrow().len()
        )
    }
}

/// Transport without a throughput ceiling.
///
/// The neutral element where a [`Pipe`] is required but no throttling
/// should happen: transfers at a finite throughput take exactly
/// `total / throughput`, unbounded transfers postpone once.
#[derive(Clone, Debug, Default)]
pub struct UnboundedPipe;

impl UnboundedPipe {
    pub fn new() -> Self {
        Self
    }

    /// Transfer without any throughput bound; completes within the instant.
    pub async fn transfer(&self, total: f64) -> SimResult<()> {
        assert!(total >= 0.0, "transfer volume must not be negative");
        postpone().await
    }

    /// Transfer `total` at exactly `throughput`.
    pub async fn transfer_at(&self, total: f64, throughput: f64) -> SimResult<()> {
        assert!(total >= 0.0, "transfer volume must not be negative");
        assert!(throughput > 0.0, "transfer throughput must be positive");
        if throughput.is_infinite() {
            return postpone().await;
        }
        let delay = total / throughput;
        if delay > 0.0 {
            suspend_for(delay).await
        } else {
            postpone().await
        }
    }
}
