//! Priority-ordered blocking work queue shared by pipeline workers
//!
//! Higher priority pops first; equal priorities pop in push order, so a
//! queue holding a single priority class behaves as a plain FIFO.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

struct Prioritized<T> {
    priority: u32,
    sequence: u64,
    item: T,
}

impl<T> PartialEq for Prioritized<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Prioritized<T> {}

impl<T> PartialOrd for Prioritized<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Prioritized<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct QueueState<T> {
    heap: BinaryHeap<Prioritized<T>>,
    next_sequence: u64,
    closed: bool,
    peak_depth: usize,
}

/// Multi-producer, multi-consumer queue with priorities
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> WorkQueue<T> {
    /// Create an empty, open queue
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_sequence: 0,
                closed: false,
                peak_depth: 0,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue an item, handing it back if the queue is closed
    ///
    /// # Errors
    ///
    /// Returns the item unchanged when the queue no longer accepts work
    pub fn push(&self, priority: u32, item: T) -> Result<(), T> {
        let mut state = self.lock();
        if state.closed {
            return Err(item);
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.heap.push(Prioritized {
            priority,
            sequence,
            item,
        });
        state.peak_depth = state.peak_depth.max(state.heap.len());
        drop(state);

        self.ready.notify_one();
        Ok(())
    }

    /// Block until an item is available
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(entry) = state.heap.pop() {
                return Some(entry.item);
            }
            if state.closed {
                return None;
            }
            state = self.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stop accepting work; queued items are still handed out
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    /// Stop accepting work and drop everything still queued
    pub fn abort(&self) {
        let drained: Vec<Prioritized<T>> = {
            let mut state = self.lock();
            state.closed = true;
            state.heap.drain().collect()
        };
        self.ready.notify_all();
        drop(drained);
    }

    /// Whether the queue has been closed
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Items currently queued
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest queue depth observed
    pub fn peak_depth(&self) -> usize {
        self.lock().peak_depth
    }

    /// Total items ever accepted
    pub fn pushed(&self) -> u64 {
        self.lock().next_sequence
    }
}
