//! Bounded pool of reusable, equally sized buffers
//!
//! All buffers are allocated once at construction and recycled for the
//! pool's lifetime. `acquire` blocks until a buffer is free, which is what
//! keeps producers from outrunning consumers. Waiters are served strictly in
//! arrival order.

use ndarray::Array2;
use rustfft::num_complex::Complex64;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::io::error::{Result, StitchError, invalid_parameter};
use crate::spatial::grid::GridPosition;

/// Real-valued pixel data of one tile
pub type PixelBuffer = Array2<f64>;

/// Frequency-domain data of one tile
pub type SpectrumBuffer = Array2<Complex64>;

/// Fixed-capacity pool of buffers shared across worker threads
///
/// Cloning the pool yields another handle to the same buffers.
pub struct BufferPool<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BufferPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<T> {
    label: &'static str,
    capacity: usize,
    state: Mutex<PoolState<T>>,
    available: Condvar,
}

struct PoolState<T> {
    /// Free buffers tagged with their slot
    free: Vec<(usize, T)>,
    /// Owner of each checked-out slot
    owners: Vec<Option<GridPosition>>,
    /// Tickets of blocked acquirers, oldest first
    waiters: VecDeque<u64>,
    next_ticket: u64,
    closed: bool,
    peak_checked_out: usize,
    acquisitions: u64,
    releases: u64,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Default> BufferPool<T> {
    /// Allocate `capacity` buffers up front using `make`
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `capacity` is zero
    pub fn new<F>(label: &'static str, capacity: usize, mut make: F) -> Result<Self>
    where
        F: FnMut() -> T,
    {
        if capacity == 0 {
            return Err(invalid_parameter(
                "pool_capacity",
                &capacity,
                &"a pool needs at least one buffer",
            ));
        }

        let free = (0..capacity).rev().map(|slot| (slot, make())).collect();
        let state = PoolState {
            free,
            owners: vec![None; capacity],
            waiters: VecDeque::new(),
            next_ticket: 0,
            closed: false,
            peak_checked_out: 0,
            acquisitions: 0,
            releases: 0,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                label,
                capacity,
                state: Mutex::new(state),
                available: Condvar::new(),
            }),
        })
    }

    /// Block until a buffer is free and check it out to `owner`
    ///
    /// # Errors
    ///
    /// Returns `PoolClosed` if the pool is closed before or while waiting
    pub fn acquire(&self, owner: GridPosition) -> Result<PooledBuffer<T>> {
        let shared = &self.shared;
        let mut state = shared.lock();

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiters.push_back(ticket);

        loop {
            if state.closed {
                state.waiters.retain(|&waiting| waiting != ticket);
                shared.available.notify_all();
                return Err(StitchError::PoolClosed { pool: shared.label });
            }

            if state.waiters.front() == Some(&ticket) {
                if let Some((slot, buffer)) = state.free.pop() {
                    state.waiters.pop_front();
                    Self::record_checkout(&mut state, shared.capacity, slot, owner);
                    if !state.free.is_empty() && !state.waiters.is_empty() {
                        shared.available.notify_all();
                    }
                    return Ok(self.handle(slot, owner, buffer));
                }
            }

            state = shared
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Check out a buffer only if one is free and nobody is queued for it
    ///
    /// # Errors
    ///
    /// Returns `PoolClosed` if the pool is closed
    pub fn try_acquire(&self, owner: GridPosition) -> Result<Option<PooledBuffer<T>>> {
        let shared = &self.shared;
        let mut state = shared.lock();

        if state.closed {
            return Err(StitchError::PoolClosed { pool: shared.label });
        }
        if !state.waiters.is_empty() {
            return Ok(None);
        }

        Ok(state.free.pop().map(|(slot, buffer)| {
            Self::record_checkout(&mut state, shared.capacity, slot, owner);
            self.handle(slot, owner, buffer)
        }))
    }

    fn record_checkout(
        state: &mut PoolState<T>,
        capacity: usize,
        slot: usize,
        owner: GridPosition,
    ) {
        if let Some(entry) = state.owners.get_mut(slot) {
            *entry = Some(owner);
        }
        state.acquisitions += 1;
        let checked_out = capacity - state.free.len();
        state.peak_checked_out = state.peak_checked_out.max(checked_out);
    }

    fn handle(&self, slot: usize, owner: GridPosition, buffer: T) -> PooledBuffer<T> {
        PooledBuffer {
            buffer,
            slot,
            owner,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> BufferPool<T> {
    /// Label used in messages
    pub fn label(&self) -> &'static str {
        self.shared.label
    }

    /// Number of buffers owned by the pool
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of buffers currently free
    pub fn available(&self) -> usize {
        self.shared.lock().free.len()
    }

    /// Number of buffers currently checked out
    pub fn checked_out(&self) -> usize {
        self.shared.capacity - self.available()
    }

    /// Highest number of buffers ever checked out at once
    pub fn peak_checked_out(&self) -> usize {
        self.shared.lock().peak_checked_out
    }

    /// Total successful acquisitions
    pub fn acquisitions(&self) -> u64 {
        self.shared.lock().acquisitions
    }

    /// Total releases
    pub fn releases(&self) -> u64 {
        self.shared.lock().releases
    }

    /// Owners of all checked-out buffers, sorted
    pub fn owners(&self) -> Vec<GridPosition> {
        let mut owners: Vec<GridPosition> =
            self.shared.lock().owners.iter().flatten().copied().collect();
        owners.sort_unstable();
        owners
    }

    /// Number of threads blocked in `acquire`
    pub fn waiting(&self) -> usize {
        self.shared.lock().waiters.len()
    }

    /// Shut the pool down and wake every waiter with `PoolClosed`
    ///
    /// Buffers still checked out are accepted back when released.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.available.notify_all();
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl<T> fmt::Debug for BufferPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("label", &self.shared.label)
            .field("capacity", &self.shared.capacity)
            .field("checked_out", &self.checked_out())
            .finish()
    }
}

/// Exclusive handle to a checked-out buffer
///
/// Dropping the handle returns the buffer to its pool and wakes the next
/// waiter.
pub struct PooledBuffer<T: Default> {
    buffer: T,
    slot: usize,
    owner: GridPosition,
    shared: Arc<Shared<T>>,
}

impl<T: Default> PooledBuffer<T> {
    /// Tile the buffer is checked out to
    pub const fn owner(&self) -> GridPosition {
        self.owner
    }

    /// Slot of the buffer within its pool
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Return the buffer to the pool now
    pub fn release(self) {
        drop(self);
    }
}

impl<T: Default> Deref for PooledBuffer<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.buffer
    }
}

impl<T: Default> DerefMut for PooledBuffer<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.buffer
    }
}

impl<T: Default> Drop for PooledBuffer<T> {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        let mut state = self.shared.lock();
        if let Some(entry) = state.owners.get_mut(self.slot) {
            *entry = None;
        }
        state.free.push((self.slot, buffer));
        state.releases += 1;
        drop(state);
        self.shared.available.notify_all();
    }
}

impl<T: Default> fmt::Debug for PooledBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("pool", &self.shared.label)
            .field("slot", &self.slot)
            .field("owner", &self.owner)
            .finish()
    }
}
