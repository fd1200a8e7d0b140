//! Time-keyed wait queue of future activations
//!
//! A priority structure keyed by virtual time; each key owns an
//! insertion-ordered bucket. Two interchangeable implementations exist:
//! - a binary heap of keys with a side map of buckets (the default), and
//! - a sorted map (`BTreeMap`).
//!
//! The implementation is selected once per simulation from the
//! `CHRONOFLOW_WAITQUEUE` environment variable; any value outside the
//! enumerated set fails at startup.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, BTreeMap, HashMap, VecDeque};

use crate::core::event_loop::Time;
use crate::error::KernelError;

/// Environment variable selecting the wait-queue implementation.
pub const WAITQUEUE_KEY: &str = "CHRONOFLOW_WAITQUEUE";

/// Totally ordered wrapper for time keys.
///
/// Buckets are keyed by the exact bit pattern, and ordered by the IEEE 754
/// total order, so insertion order per time value survives bucket eviction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimeKey(Time);

impl TimeKey {
    pub(crate) fn value(self) -> Time {
        self.0
    }
}

impl PartialEq for TimeKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for TimeKey {}

impl std::hash::Hash for TimeKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl PartialOrd for TimeKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Wait queue over values of type `V`.
#[derive(Debug)]
pub(crate) enum WaitQueue<V> {
    Heap(HeapWaitQueue<V>),
    Sorted(SortedWaitQueue<V>),
}

impl<V> WaitQueue<V> {
    /// Select an implementation from the process environment.
    pub(crate) fn from_env() -> Result<Self, KernelError> {
        let value = std::env::var(WAITQUEUE_KEY).unwrap_or_default();
        match value.to_ascii_lowercase().as_str() {
            "" | "heap" => Ok(WaitQueue::Heap(HeapWaitQueue::new())),
            "sorted" => Ok(WaitQueue::Sorted(SortedWaitQueue::new())),
            _ => Err(KernelError::InvalidWaitQueue {
                key: WAITQUEUE_KEY,
                value,
            }),
        }
    }

    pub(crate) fn push(&mut self, at: Time, item: V) {
        match self {
            WaitQueue::Heap(queue) => queue.push(TimeKey(at), item),
            WaitQueue::Sorted(queue) => queue.push(TimeKey(at), item),
        }
    }

    /// Remove and return the earliest bucket together with its time.
    pub(crate) fn pop(&mut self) -> Option<(TimeKey, VecDeque<V>)> {
        match self {
            WaitQueue::Heap(queue) => queue.pop(),
            WaitQueue::Sorted(queue) => queue.pop(),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        match self {
            WaitQueue::Heap(queue) => queue.keys.is_empty(),
            WaitQueue::Sorted(queue) => queue.buckets.is_empty(),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        match self {
            WaitQueue::Heap(queue) => queue.buckets.values().map(VecDeque::len).sum(),
            WaitQueue::Sorted(queue) => queue.buckets.values().map(VecDeque::len).sum(),
        }
    }
}

/// Heap of time keys plus a side map of per-time buckets.
///
/// A key enters the heap only when its bucket is created, so each key is
/// present at most once and the bucket keeps pure insertion order.
#[derive(Debug)]
pub(crate) struct HeapWaitQueue<V> {
    keys: BinaryHeap<Reverse<TimeKey>>,
    buckets: HashMap<TimeKey, VecDeque<V>>,
}

impl<V> HeapWaitQueue<V> {
    fn new() -> Self {
        Self {
            keys: BinaryHeap::new(),
            buckets: HashMap::new(),
        }
    }

    fn push(&mut self, key: TimeKey, item: V) {
        match self.buckets.get_mut(&key) {
            Some(bucket) => bucket.push_back(item),
            None => {
                let mut bucket = VecDeque::new();
                bucket.push_back(item);
                self.buckets.insert(key, bucket);
                self.keys.push(Reverse(key));
            }
        }
    }

    fn pop(&mut self) -> Option<(TimeKey, VecDeque<V>)> {
        let Reverse(key) = self.keys.pop()?;
        let bucket = self.buckets.remove(&key)?;
        Some((key, bucket))
    }
}

/// Sorted-map implementation backed by a `BTreeMap`.
#[derive(Debug)]
pub(crate) struct SortedWaitQueue<V> {
    buckets: BTreeMap<TimeKey, VecDeque<V>>,
}

impl<V> SortedWaitQueue<V> {
    fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
        }
    }

    fn push(&mut self, key: TimeKey, item: V) {
        self.buckets.entry(key).or_default().push_back(item);
    }

    fn pop(&mut self) -> Option<(TimeKey, VecDeque<V>)> {
        self.buckets.pop_first()
    }
}
