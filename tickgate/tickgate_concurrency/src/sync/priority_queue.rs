//! Thread-safe priority queue.
//!
//! A binary heap behind a single `parking_lot` mutex. Every operation takes
//! the lock, so the queue is simple rather than fast; producers are expected
//! to be occasional background workers, not a hot path.

use log::trace;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::marker::PhantomData;

/// Ordering used to rank priorities.
///
/// The entry whose priority compares as `Ordering::Less` against every other
/// entry is dequeued first.
pub trait PriorityOrder<P>: Send + Sync + 'static {
    /// Compare two priorities
    fn compare(a: &P, b: &P) -> Ordering;
}

/// Natural order: the lowest priority value is dequeued first
#[derive(Debug, Clone, Copy, Default)]
pub struct Ascending;

impl<P: Ord> PriorityOrder<P> for Ascending {
    fn compare(a: &P, b: &P) -> Ordering {
        a.cmp(b)
    }
}

/// Reversed natural order: the highest priority value is dequeued first
#[derive(Debug, Clone, Copy, Default)]
pub struct Descending;

impl<P: Ord> PriorityOrder<P> for Descending {
    fn compare(a: &P, b: &P) -> Ordering {
        b.cmp(a)
    }
}

/// An element paired with its priority
struct Entry<E, P, O> {
    element: E,
    priority: P,
    _order: PhantomData<fn() -> O>,
}

impl<E, P, O: PriorityOrder<P>> PartialEq for Entry<E, P, O> {
    fn eq(&self, other: &Self) -> bool {
        O::compare(&self.priority, &other.priority) == Ordering::Equal
    }
}

impl<E, P, O: PriorityOrder<P>> Eq for Entry<E, P, O> {}

impl<E, P, O: PriorityOrder<P>> PartialOrd for Entry<E, P, O> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E, P, O: PriorityOrder<P>> Ord for Entry<E, P, O> {
    // BinaryHeap pops the greatest entry, so the comparison is flipped.
    fn cmp(&self, other: &Self) -> Ordering {
        O::compare(&other.priority, &self.priority)
    }
}

/// A priority queue that can be shared between threads.
///
/// Entries with equal priority are dequeued in an unspecified order;
/// insertion order is not preserved among ties.
pub struct ConcurrentPriorityQueue<E, P, O = Ascending>
where
    O: PriorityOrder<P>,
{
    heap: Mutex<BinaryHeap<Entry<E, P, O>>>,
}

impl<E, P, O: PriorityOrder<P>> ConcurrentPriorityQueue<E, P, O> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
        }
    }

    /// Create an empty queue with room for `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::with_capacity(capacity)),
        }
    }

    /// Insert an element with the given priority
    pub fn enqueue(&self, element: E, priority: P) {
        self.heap.lock().push(Entry {
            element,
            priority,
            _order: PhantomData,
        });
    }

    /// Remove and return the first entry, or `None` if the queue is empty
    pub fn try_dequeue(&self) -> Option<(E, P)> {
        self.heap
            .lock()
            .pop()
            .map(|entry| (entry.element, entry.priority))
    }

    /// Inspect the first entry without removing it
    pub fn peek_with<R>(&self, f: impl FnOnce(&E, &P) -> R) -> Option<R> {
        let heap = self.heap.lock();
        heap.peek().map(|entry| f(&entry.element, &entry.priority))
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Discard every entry
    pub fn clear(&self) {
        let mut heap = self.heap.lock();
        trace!("Clearing priority queue with {} entries", heap.len());
        heap.clear();
    }

    /// Remove every entry, returned in dequeue order
    pub fn drain_sorted(&self) -> Vec<(E, P)> {
        let mut heap = self.heap.lock();
        let mut drained = Vec::with_capacity(heap.len());
        while let Some(entry) = heap.pop() {
            drained.push((entry.element, entry.priority));
        }
        drained
    }
}

impl<E: Clone, P: Clone, O: PriorityOrder<P>> ConcurrentPriorityQueue<E, P, O> {
    /// Return a copy of the first entry without removing it
    pub fn try_peek(&self) -> Option<(E, P)> {
        self.peek_with(|element, priority| (element.clone(), priority.clone()))
    }
}

impl<E, P, O: PriorityOrder<P>> Default for ConcurrentPriorityQueue<E, P, O> {
    fn default() -> Self {
        Self::new()
    }
}
