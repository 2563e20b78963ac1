//! Outstanding-request counting for callers that need to wait for a drain.
//!
//! The dispatcher never blocks on in-flight work; after
//! [`Dispatcher::stop`](crate::Dispatcher::stop) a caller that wants to know
//! when every callback has run registers its requests with a
//! [`CompletionTracker`] and waits on it.

use may::sync::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Inner {
    pending: Mutex<usize>,
    drained: Condvar,
}

/// Wait-group style counter of outstanding requests
#[derive(Clone)]
pub struct CompletionTracker {
    inner: Arc<Inner>,
}

impl CompletionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(0),
                drained: Condvar::new(),
            }),
        }
    }

    /// Register one outstanding request and get the guard that releases it
    #[must_use]
    pub fn register(&self) -> TrackerGuard {
        *self.lock() += 1;
        TrackerGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of requests not yet released
    #[must_use]
    pub fn pending(&self) -> usize {
        *self.lock()
    }

    /// Block until every registered request has been released
    pub fn wait(&self) {
        let mut pending = self.lock();
        while *pending > 0 {
            pending = match self.inner.drained.wait(pending) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Block until drained or `timeout` elapses. Returns `true` when drained.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut pending = self.lock();
        while *pending > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            pending = match self.inner.drained.wait_timeout(pending, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    fn lock(&self) -> may::sync::MutexGuard<'_, usize> {
        match self.inner.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompletionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionTracker")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Releases its registration on drop.
///
/// A [`Request`](crate::Request) built with
/// [`Request::tracked`](crate::Request::tracked) drops its guard after the
/// completion callback returns, or when the request itself is dropped
/// without ever being admitted.
pub struct TrackerGuard {
    inner: Arc<Inner>,
}

impl fmt::Debug for TrackerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TrackerGuard")
    }
}

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        let mut pending = match self.inner.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.inner.drained.notify_all();
        }
    }
}
