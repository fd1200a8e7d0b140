//! Explicitly settable condition

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::condition::{waitpoint_via_cond, Cond, ConditionNode};
use crate::error::SimResult;
use crate::notify::Notification;
use crate::suspend::postpone;

struct FlagCore {
    value: Cell<bool>,
    waiters: Notification,
    inverse_waiters: Notification,
}

/// A boolean condition that activities set and await.
///
/// ```ignore
/// let flag = Flag::new();
/// flag.cond().wait().await?;   // resume once the flag is set
/// flag.set().await?;           // set it, waking all waiters
/// until(&flag, |scope| async move { .. }).await?;
/// ```
#[derive(Clone)]
pub struct Flag {
    core: Rc<FlagCore>,
}

impl Flag {
    pub fn new() -> Self {
        Self {
            core: Rc::new(FlagCore {
                value: Cell::new(false),
                waiters: Notification::new("flag"),
                inverse_waiters: Notification::new("inverse flag"),
            }),
        }
    }

    /// Current boolean value, without suspending.
    pub fn is_set(&self) -> bool {
        self.core.value.get()
    }

    /// Set the flag, waking all waiters.
    pub async fn set(&self) -> SimResult<()> {
        self.set_to(true).await
    }

    /// Clear the flag, waking waiters of the inverse condition.
    pub async fn clear(&self) -> SimResult<()> {
        self.set_to(false).await
    }

    /// Set the boolean value of this condition.
    pub async fn set_to(&self, to: bool) -> SimResult<()> {
        let value = self.core.value.get();
        if to && !value {
            self.core.value.set(true);
            self.core.waiters.awake_all();
        } else if value && !to {
            self.core.value.set(false);
            self.core.inverse_waiters.awake_all();
        }
        postpone().await
    }

    /// Set the value and wake waiters without postponing. Used on forced
    /// shutdown paths where no suspension is allowed.
    pub(crate) fn force_set(&self) {
        if !self.core.value.get() {
            self.core.value.set(true);
            self.core.waiters.awake_all();
        }
    }

    /// This flag as a composable condition.
    pub fn cond(&self) -> Cond {
        Cond::from(self.clone())
    }

    /// Suspend until the flag is set.
    pub async fn wait(&self) -> SimResult<()> {
        self.cond().wait().await
    }
}

impl Default for Flag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<flag, set={}>", self.is_set())
    }
}

impl ConditionNode for Flag {
    fn probe(&self) -> bool {
        self.core.value.get()
    }

    fn waiters(&self) -> &Notification {
        &self.core.waiters
    }

    fn invert(&self) -> Cond {
        Cond::from_node(Rc::new(InverseFlag {
            core: Rc::clone(&self.core),
        }))
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flag")
    }
}

impl From<Flag> for Cond {
    fn from(flag: Flag) -> Self {
        Cond::from_node(Rc::new(flag))
    }
}

impl From<&Flag> for Cond {
    fn from(flag: &Flag) -> Self {
        flag.clone().into()
    }
}

waitpoint_via_cond!(Flag, &Flag);

/// View of a [`Flag`] that holds while the flag is unset.
struct InverseFlag {
    core: Rc<FlagCore>,
}

impl ConditionNode for InverseFlag {
    fn probe(&self) -> bool {
        !self.core.value.get()
    }

    fn waiters(&self) -> &Notification {
        &self.core.inverse_waiters
    }

    fn invert(&self) -> Cond {
        Cond::from_node(Rc::new(Flag {
            core: Rc::clone(&self.core),
        }))
    }

    fn describe(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!flag")
    }
}
