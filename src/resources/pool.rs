//! Supplies of named resources that can be borrowed and claimed
//!
//! A pool tracks the available levels of a fixed set of named resources.
//! Borrowing waits until the requested amounts are available, removes them
//! atomically (no suspension between the passing test and the subtraction),
//! and hands out a sub-pool limited to the borrowed amounts. Releasing
//! restores them; a forcibly-closed borrow schedules its restitution
//! through the loop instead.
//!
//! [`Resources`] is an open supply whose levels can also be set, increased
//! and decreased; [`Capacities`] is a conserved supply whose total is fixed
//! at construction.

use std::fmt;
use std::rc::Rc;

use futures::FutureExt;
use tracing::trace;

use crate::core::event_loop::ScheduleAt;
use crate::core::handler;
use crate::error::{Abort, ResourcesUnavailable, SimResult};
use crate::resources::levels::{schema_of, ResourceLevels, Schema};
use crate::resources::tracked::Tracked;

struct PoolCore {
    label: String,
    schema: Schema,
    available: Tracked<ResourceLevels>,
}

impl PoolCore {
    fn new(label: String, schema: Schema, levels: ResourceLevels) -> Rc<Self> {
        Rc::new(Self {
            label,
            schema,
            available: Tracked::new(levels),
        })
    }

    fn levels(&self) -> ResourceLevels {
        self.available.get()
    }

    async fn insert(&self, amounts: &ResourceLevels) -> SimResult<()> {
        let updated = self.levels().plus(amounts);
        self.available.set(updated).await
    }

    async fn remove(&self, amounts: &ResourceLevels) -> SimResult<()> {
        let updated = self.levels().minus(amounts);
        self.available.set(updated).await
    }

    /// Wait until `debits` are available and take them.
    ///
    /// The final check and the subtraction run without any suspension in
    /// between, so no other borrow can interleave.
    async fn acquire(self: &Rc<Self>, debits: ResourceLevels) -> SimResult<Borrowed> {
        if !self.peek_satisfies(&debits) {
            self.available.at_least(debits.clone()).wait().await?;
        }
        self.remove(&debits).await?;
        let sub = PoolCore::new(
            format!("{} borrow", self.label),
            Rc::clone(&self.schema),
            ResourceLevels::zero(&self.schema),
        );
        sub.insert(&debits).await?;
        trace!(pool = %self.label, amounts = %debits, "borrowed");
        Ok(Borrowed {
            core: sub,
            parent: Rc::clone(self),
            debits,
            released: std::cell::Cell::new(false),
        })
    }

    fn peek_satisfies(&self, debits: &ResourceLevels) -> bool {
        self.available.peek(|levels| levels >= debits)
    }

    fn checked_debits(&self, amounts: &[(&str, f64)]) -> ResourceLevels {
        let debits = ResourceLevels::from_pairs(&self.schema, amounts);
        assert!(
            debits.all_non_negative(),
            "cannot borrow negative amounts from {}",
            self.label
        );
        debits
    }
}

/// Supply of named resources which can be borrowed or produced/consumed.
///
/// The resources and their initial levels are defined at creation;
/// afterwards the levels can be permanently changed with
/// [`set`](Resources::set), [`increase`](Resources::increase) and
/// [`decrease`](Resources::decrease), or temporarily reduced by borrowing.
#[derive(Clone)]
pub struct Resources {
    core: Rc<PoolCore>,
}

impl Resources {
    /// Define a supply from `(name, initial level)` pairs.
    pub fn new(initial: &[(&str, f64)]) -> Self {
        let schema = schema_of(initial.iter().map(|(name, _)| name.to_string()));
        let levels = ResourceLevels::from_pairs(&schema, initial);
        assert!(
            levels.all_non_negative(),
            "initial resource levels must not be negative"
        );
        Self {
            core: PoolCore::new("resource supply".to_string(), schema, levels),
        }
    }

    /// Current levels of resources.
    pub fn levels(&self) -> ResourceLevels {
        self.core.levels()
    }

    /// Temporarily borrow resources, waiting until they are available.
    pub async fn borrow(&self, amounts: &[(&str, f64)]) -> SimResult<Borrowed> {
        let debits = self.core.checked_debits(amounts);
        self.core.acquire(debits).await
    }

    /// Borrow resources, failing immediately when they are unavailable.
    pub async fn claim(&self, amounts: &[(&str, f64)]) -> SimResult<Borrowed> {
        let debits = self.core.checked_debits(amounts);
        if !self.core.peek_satisfies(&debits) {
            return Err(Abort::failed(ResourcesUnavailable {
                pool: self.core.label.clone(),
                request: debits.to_string(),
            }));
        }
        self.core.acquire(debits).await
    }

    /// Set the levels of the named resources; unnamed levels are unchanged.
    pub async fn set(&self, amounts: &[(&str, f64)]) -> SimResult<()> {
        let updated = self.core.levels().updated(amounts);
        assert!(
            updated.all_non_negative(),
            "resource levels cannot be set below zero"
        );
        self.core.available.set(updated).await
    }

    /// Permanently increase levels by non-negative deltas.
    pub async fn increase(&self, amounts: &[(&str, f64)]) -> SimResult<()> {
        let delta = self.core.checked_debits(amounts);
        self.core.insert(&delta).await
    }

    /// Permanently decrease levels by non-negative deltas; levels cannot go
    /// below zero.
    pub async fn decrease(&self, amounts: &[(&str, f64)]) -> SimResult<()> {
        let delta = self.core.checked_debits(amounts);
        assert!(
            self.core.levels().minus(&delta).all_non_negative(),
            "resource levels cannot be decreased below zero"
        );
        self.core.remove(&delta).await
    }
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<resources, available {}>", self.core.levels())
    }
}

/// Fixed supply of named resources which can only be temporarily borrowed.
///
/// Conservation holds at every instant: outstanding borrows plus available
/// levels equal the declared capacity, component-wise.
#[derive(Clone)]
pub struct Capacities {
    core: Rc<PoolCore>,
    limits: ResourceLevels,
}

impl Capacities {
    /// Define a conserved supply from `(name, capacity)` pairs.
    pub fn new(capacity: &[(&str, f64)]) -> Self {
        let schema = schema_of(capacity.iter().map(|(name, _)| name.to_string()));
        let levels = ResourceLevels::from_pairs(&schema, capacity);
        assert!(
            levels.all_non_negative(),
            "initial capacities must not be negative"
        );
        Self {
            core: PoolCore::new("capacity supply".to_string(), schema, levels.clone()),
            limits: levels,
        }
    }

    /// The total capacity fixed at construction.
    pub fn limits(&self) -> &ResourceLevels {
        &self.limits
    }

    /// Current available levels.
    pub fn levels(&self) -> ResourceLevels {
        self.core.levels()
    }

    /// Temporarily borrow resources, waiting until they are available.
    pub async fn borrow(&self, amounts: &[(&str, f64)]) -> SimResult<Borrowed> {
        let debits = self.core.checked_debits(amounts);
        assert!(
            debits <= self.limits,
            "cannot borrow beyond the declared capacity"
        );
        self.core.acquire(debits).await
    }

    /// Borrow resources, failing immediately when they are unavailable.
    pub async fn claim(&self, amounts: &[(&str, f64)]) -> SimResult<Borrowed> {
        let debits = self.core.checked_debits(amounts);
        assert!(
            debits <= self.limits,
            "cannot claim beyond the declared capacity"
        );
        if !self.core.peek_satisfies(&debits) {
            return Err(Abort::failed(ResourcesUnavailable {
                pool: self.core.label.clone(),
                request: debits.to_string(),
            }));
        }
        self.core.acquire(debits).await
    }
}

impl fmt::Debug for Capacities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<capacities, available {} of {}>",
            self.core.levels(),
            self.limits
        )
    }
}

/// Resources temporarily taken from another supply.
///
/// Acts as a sub-pool limited to the borrowed amounts: nested borrows and
/// claims are allowed within [`limits`](Borrowed::limits). Release the
/// borrow with [`release`](Borrowed::release); a borrow dropped without
/// release (the forced-close path) schedules its restitution through the
/// loop, and drops it silently when the loop is already gone.
pub struct Borrowed {
    core: Rc<PoolCore>,
    parent: Rc<PoolCore>,
    debits: ResourceLevels,
    released: std::cell::Cell<bool>,
}

impl Borrowed {
    /// Upper limit of this sub-pool's levels: the borrowed amounts.
    pub fn limits(&self) -> &ResourceLevels {
        &self.debits
    }

    /// Currently available levels within the sub-pool.
    pub fn levels(&self) -> ResourceLevels {
        self.core.levels()
    }

    /// Borrow from the borrowed amounts, within this sub-pool's limits.
    pub async fn borrow(&self, amounts: &[(&str, f64)]) -> SimResult<Borrowed> {
        let debits = self.core.checked_debits(amounts);
        assert!(
            debits <= self.debits,
            "cannot borrow beyond the borrowed amounts"
        );
        self.core.acquire(debits).await
    }

    /// Claim from the borrowed amounts, failing fast when unavailable.
    pub async fn claim(&self, amounts: &[(&str, f64)]) -> SimResult<Borrowed> {
        let debits = self.core.checked_debits(amounts);
        assert!(
            debits <= self.debits,
            "cannot claim beyond the borrowed amounts"
        );
        if !self.core.peek_satisfies(&debits) {
            return Err(Abort::failed(ResourcesUnavailable {
                pool: self.core.label.clone(),
                request: debits.to_string(),
            }));
        }
        self.core.acquire(debits).await
    }

    /// Return the borrowed amounts to the parent supply.
    pub async fn release(self) -> SimResult<()> {
        self.released.set(true);
        self.core.remove(&self.debits).await?;
        self.parent.insert(&self.debits).await?;
        trace!(pool = %self.parent.label, amounts = %self.debits, "released");
        Ok(())
    }
}

impl Drop for Borrowed {
    fn drop(&mut self) {
        if self.released.get() {
            return;
        }
        // forcibly closed: restitution cannot await here, dispatch it as a
        // fresh activity; once the loop is gone it is dropped silently
        let own = Rc::clone(&self.core);
        let parent = Rc::clone(&self.parent);
        let debits = self.debits.clone();
        let _ = handler::try_with(|event_loop| {
            let restitution = async move {
                let _ = own.remove(&debits).await;
                let _ = parent.insert(&debits).await;
            }
            .boxed_local();
            event_loop.spawn(restitution, ScheduleAt::Now);
        });
    }
}

impl fmt::Debug for Borrowed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<borrowed {} of {}>", self.core.levels(), self.debits)
    }
}
