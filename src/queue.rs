//! # Bounded Queue Module
//!
//! A bounded, closable, multi-producer/multi-consumer FIFO used both as the
//! dispatcher's shared admission queue and as the pipe between two stages of
//! a worker.
//!
//! ## Capacity semantics
//!
//! A push is accepted while the number of queued items is below
//! `max(capacity, idle_consumers)`. With `capacity > 0` this is a plain
//! bounded buffer. With `capacity == 0` it degenerates into a hand-off: an
//! item is only accepted while a consumer is parked in [`BoundedQueue::pop`]
//! waiting for it.
//!
//! ## Closure
//!
//! [`BoundedQueue::close`] is idempotent. After closure pushes are refused,
//! but consumers keep receiving the items already queued and only observe
//! `None` once the queue is both closed and empty.
//!
//! ## Runtime
//!
//! Built on `may::sync::{Mutex, Condvar}` so a parked coroutine yields its
//! runtime thread. The same primitives block normally when called from a
//! plain OS thread.

use may::sync::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Why a push did not enqueue its item. The item is handed back.
pub enum PushError<T> {
    /// No room appeared before the deadline
    Timeout(T),
    /// No room and the caller asked not to wait
    Full(T),
    /// The queue has been closed
    Closed(T),
}

impl<T> PushError<T> {
    /// Recover the rejected item
    pub fn into_inner(self) -> T {
        match self {
            PushError::Timeout(item) | PushError::Full(item) | PushError::Closed(item) => item,
        }
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Timeout(_) => f.write_str("Timeout(..)"),
            PushError::Full(_) => f.write_str("Full(..)"),
            PushError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Timeout(_) => f.write_str("timed out waiting for queue capacity"),
            PushError::Full(_) => f.write_str("queue is full"),
            PushError::Closed(_) => f.write_str("queue is closed"),
        }
    }
}

struct State<T> {
    items: VecDeque<T>,
    idle_consumers: usize,
    closed: bool,
}

/// Bounded MPMC FIFO with close-and-drain semantics
pub struct BoundedQueue<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (`0` = hand-off)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                idle_consumers: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Configured capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items currently waiting for a consumer
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// True when no item is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// True once [`close`](Self::close) has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Push without waiting
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.lock();
        if state.closed {
            return Err(PushError::Closed(item));
        }
        if !self.has_room(&state) {
            return Err(PushError::Full(item));
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Push, waiting at most `timeout` for room.
    ///
    /// A timeout too large to express as a deadline waits like [`push`](Self::push).
    pub fn push_timeout(&self, item: T, timeout: Duration) -> Result<(), PushError<T>> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.push(item);
        };
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(PushError::Closed(item));
            }
            if self.has_room(&state) {
                state.items.push_back(item);
                drop(state);
                self.not_empty.notify_one();
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(PushError::Timeout(item));
            }
            state = match self.not_full.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Push, waiting as long as it takes for room or closure
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(PushError::Closed(item));
            }
            if self.has_room(&state) {
                state.items.push_back(item);
                drop(state);
                self.not_empty.notify_one();
                return Ok(());
            }
            state = match self.not_full.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Take the oldest item, waiting for one to arrive.
    ///
    /// Returns `None` only when the queue is closed and fully drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            // A parked consumer is room for one more hand-off.
            state.idle_consumers += 1;
            self.not_full.notify_one();
            state = match self.not_empty.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            state.idle_consumers -= 1;
        }
    }

    /// Take the oldest item if one is queued
    pub fn try_pop(&self) -> Option<T> {
        let item = self.lock().items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Refuse further pushes and wake every waiter.
    ///
    /// Returns `true` for the call that actually closed the queue and `false`
    /// for every later call.
    pub fn close(&self) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
        true
    }

    fn has_room(&self, state: &State<T>) -> bool {
        state.items.len() < self.capacity.max(state.idle_consumers)
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("len", &state.items.len())
            .field("idle_consumers", &state.idle_consumers)
            .field("closed", &state.closed)
            .finish()
    }
}
