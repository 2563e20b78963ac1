//! Lock-free counters describing a dispatcher's admission and completion
//! activity. All updates use relaxed atomics; a [`MetricsSnapshot`] is a
//! point-in-time copy that is not guaranteed to be internally consistent
//! while requests are in flight.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters for one dispatcher
#[derive(Debug, Default)]
pub struct DispatcherMetrics {
    admitted: AtomicU64,
    timed_out: AtomicU64,
    shed: AtomicU64,
    rejected_closed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    callback_panics: AtomicU64,
    active_workers: AtomicUsize,
}

impl DispatcherMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shed(&self) {
        self.shed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_closed(&self) {
        self.rejected_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_callback_panic(&self) {
        self.callback_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn worker_exited(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Workers whose stage chain has not yet fully unwound
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Requests admitted but not yet completed or failed
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        let finished =
            self.completed.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed);
        self.admitted.load(Ordering::Relaxed).saturating_sub(finished)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            shed: self.shed.load(Ordering::Relaxed),
            rejected_closed: self.rejected_closed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
            active_workers: self.active_workers(),
            in_flight: self.in_flight(),
        }
    }
}

/// Point-in-time copy of [`DispatcherMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub admitted: u64,
    pub timed_out: u64,
    pub shed: u64,
    pub rejected_closed: u64,
    pub completed: u64,
    pub failed: u64,
    /// Callbacks that panicked; each is also counted as completed or failed
    pub callback_panics: u64,
    pub active_workers: usize,
    pub in_flight: u64,
}
