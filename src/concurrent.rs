//! Aggregated failure of concurrent tasks
//!
//! A scope whose children fail collapses their errors into a single
//! [`Concurrent`] value. Handlers discriminate on the *set* of child error
//! types with [`Concurrent::matches`] (exact cover) and
//! [`Concurrent::matches_inclusive`] (at-least cover), the statically-typed
//! rendition of specialising a multi-exception by its child types:
//!
//! ```ignore
//! match scope_result {
//!     Err(abort) if abort.downcast_ref::<Concurrent>()
//!         .is_some_and(|c| c.matches::<(KeyMissing, IndexOutOfRange)>()) => { .. }
//!     _ => { .. }
//! }
//! ```
//!
//! A bare downcast to [`Concurrent`] matches any aggregation, mirroring the
//! unspecialised form.

use std::fmt;
use std::sync::Arc;

/// Probe set describing the child-error types of a specialisation.
///
/// Implemented for tuples of error types up to arity eight; each member
/// contributes a probe answering "is this child of my type?".
pub trait FailureSpec {
    fn probes() -> Vec<fn(&anyhow::Error) -> bool>;
}

macro_rules! impl_failure_spec {
    ($($member:ident),+) => {
        impl<$($member),+> FailureSpec for ($($member,)+)
        where
            $($member: std::error::Error + Send + Sync + 'static),+
        {
            fn probes() -> Vec<fn(&anyhow::Error) -> bool> {
                vec![$(|error: &anyhow::Error| error.is::<$member>()),+]
            }
        }
    };
}

impl_failure_spec!(A);
impl_failure_spec!(A, B);
impl_failure_spec!(A, B, C);
impl_failure_spec!(A, B, C, D);
impl_failure_spec!(A, B, C, D, E);
impl_failure_spec!(A, B, C, D, E, F);
impl_failure_spec!(A, B, C, D, E, F, G);
impl_failure_spec!(A, B, C, D, E, F, G, H);

/// Failure of one or more concurrent tasks of a scope.
///
/// Carries the failures of all failed children; cancellation and forced
/// closure are not failures and never appear here. Raised only by scopes,
/// never by a single task.
pub struct Concurrent {
    children: Vec<Arc<anyhow::Error>>,
}

impl Concurrent {
    pub(crate) fn new(children: Vec<Arc<anyhow::Error>>) -> Self {
        debug_assert!(!children.is_empty(), "an empty aggregation is not raised");
        Self { children }
    }

    /// The child failures, in task creation order.
    pub fn children(&self) -> &[Arc<anyhow::Error>] {
        &self.children
    }

    /// Exact specialisation: the set of child types is exactly covered by
    /// the members of `S`, in any order.
    pub fn matches<S: FailureSpec>(&self) -> bool {
        let probes = S::probes();
        let every_child_covered = self
            .children
            .iter()
            .all(|child| probes.iter().any(|probe| probe(child)));
        let every_member_present = probes
            .iter()
            .all(|probe| self.children.iter().any(|child| probe(child)));
        every_child_covered && every_member_present
    }

    /// Inclusive specialisation: at least one child of each member type of
    /// `S` is present; additional child types are allowed.
    pub fn matches_inclusive<S: FailureSpec>(&self) -> bool {
        S::probes()
            .iter()
            .all(|probe| self.children.iter().any(|child| probe(child)))
    }
}

impl fmt::Display for Concurrent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "concurrent failure of {} tasks: ", self.children.len())?;
        for (index, child) in self.children.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{child}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Concurrent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Concurrent")
            .field("children", &self.children)
            .finish()
    }
}

impl std::error::Error for Concurrent {}
