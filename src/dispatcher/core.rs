//! Dispatcher core: admission, worker attachment and shutdown.

use crate::error::PoolError;
use crate::metrics::{DispatcherMetrics, MetricsSnapshot};
use crate::queue::{BoundedQueue, PushError};
use crate::request::Request;
use crate::runtime_config::{BackpressureMode, DispatcherConfig, MIN_STACK_SIZE};
use crate::worker::{LaunchContext, RequestQueue, WorkerHandle, WorkerLauncher};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of [`Dispatcher::make_request`].
///
/// Anything other than [`Admission::Admitted`] means the request was dropped
/// and its completion callback will never run.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    /// The request is queued and will be served by exactly one worker
    Admitted,
    /// No room appeared within the admission timeout
    TimedOut,
    /// No room, and the dispatcher sheds instead of waiting
    Full,
    /// The dispatcher has been stopped
    Closed,
}

impl Admission {
    #[must_use]
    pub fn is_admitted(self) -> bool {
        self == Admission::Admitted
    }
}

impl fmt::Display for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Admission::Admitted => f.write_str("admitted"),
            Admission::TimedOut => f.write_str("admission timed out"),
            Admission::Full => f.write_str("queue full"),
            Admission::Closed => f.write_str("dispatcher stopped"),
        }
    }
}

/// Lifecycle of a dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherState {
    /// Accepting admissions
    Open,
    /// Stopped; queued requests or running stage chains remain
    Closing,
    /// Stopped, queue drained and every worker chain has exited
    Closed,
}

struct Shared<P> {
    queue: Arc<RequestQueue<P>>,
    config: DispatcherConfig,
    metrics: Arc<DispatcherMetrics>,
}

impl<P> Drop for Shared<P> {
    fn drop(&mut self) {
        // Last dispatcher handle gone: let workers drain and exit.
        if self.queue.close() {
            debug!("Dispatcher dropped without stop - queue closed");
        }
    }
}

/// Owner of the shared admission queue.
///
/// Cloning is cheap and every clone refers to the same queue. When the last
/// clone is dropped the queue is closed as if [`stop`](Self::stop) had been
/// called.
pub struct Dispatcher<P> {
    shared: Arc<Shared<P>>,
}

impl<P> Clone for Dispatcher<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P> fmt::Debug for Dispatcher<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queue", &self.shared.queue)
            .field("config", &self.shared.config)
            .finish()
    }
}

impl<P: Send + 'static> Dispatcher<P> {
    /// Create a dispatcher whose queue holds `capacity` requests (`0` = hand-off).
    /// Every other setting takes its default.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_config(DispatcherConfig::with_capacity(capacity))
    }

    /// Create a dispatcher from a full configuration.
    ///
    /// A `stack_size` below [`MIN_STACK_SIZE`] is raised to the minimum.
    #[must_use]
    pub fn with_config(mut config: DispatcherConfig) -> Self {
        if config.stack_size < MIN_STACK_SIZE {
            warn!(
                stack_size = config.stack_size,
                min_stack_size = MIN_STACK_SIZE,
                "Stack size below minimum - clamping"
            );
            config.stack_size = MIN_STACK_SIZE;
        }
        info!(
            queue_capacity = config.queue_capacity,
            admission_timeout_ms = config.admission_timeout_ms,
            backpressure_mode = %config.backpressure_mode,
            stack_size = config.stack_size,
            "Creating dispatcher"
        );
        Self {
            shared: Arc::new(Shared {
                queue: Arc::new(BoundedQueue::new(config.queue_capacity)),
                config,
                metrics: Arc::new(DispatcherMetrics::new()),
            }),
        }
    }

    /// Attach a worker to the shared queue. It starts consuming immediately and
    /// competes with every other attached worker for requests.
    pub fn launch_worker<W>(&self, worker: &W) -> Result<WorkerHandle, PoolError>
    where
        W: WorkerLauncher<P> + ?Sized,
    {
        if self.shared.queue.is_closed() {
            warn!(
                worker_id = %worker.id(),
                "Refusing to launch worker on a stopped dispatcher"
            );
            return Err(PoolError::Stopped);
        }
        let ctx = LaunchContext::new(
            self.shared.config.stack_size,
            Arc::clone(&self.shared.metrics),
        );
        worker.launch(Arc::clone(&self.shared.queue), &ctx)
    }

    /// Enqueue a request according to the configured backpressure mode.
    ///
    /// In [`BackpressureMode::Block`] this waits up to the configured
    /// admission timeout for room; in [`BackpressureMode::Shed`] it never waits.
    pub fn make_request(&self, request: Request<P>) -> Admission {
        match self.shared.config.backpressure_mode {
            BackpressureMode::Block => self.admit(request, Some(self.shared.config.admission_timeout())),
            BackpressureMode::Shed => self.admit(request, None),
        }
    }

    /// Enqueue a request, waiting at most `timeout` for room regardless of
    /// the configured backpressure mode
    pub fn make_request_timeout(&self, request: Request<P>, timeout: Duration) -> Admission {
        self.admit(request, Some(timeout))
    }

    fn admit(&self, request: Request<P>, timeout: Option<Duration>) -> Admission {
        let request_id = request.id();
        let queue = &self.shared.queue;
        let metrics = &self.shared.metrics;

        let pushed = match timeout {
            Some(timeout) => queue.push_timeout(request, timeout),
            None => queue.try_push(request),
        };

        // A rejected request is dropped here; its callback never runs.
        match pushed {
            Ok(()) => {
                metrics.record_admitted();
                debug!(request_id = %request_id, "Request admitted");
                Admission::Admitted
            }
            Err(PushError::Timeout(_)) => {
                metrics.record_timed_out();
                let timeout_ms =
                    timeout.map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
                warn!(
                    request_id = %request_id,
                    timeout_ms,
                    queue_capacity = queue.capacity(),
                    "Admission timed out - request dropped"
                );
                Admission::TimedOut
            }
            Err(PushError::Full(_)) => {
                metrics.record_shed();
                warn!(
                    request_id = %request_id,
                    queue_capacity = queue.capacity(),
                    "Queue full - request shed"
                );
                Admission::Full
            }
            Err(PushError::Closed(_)) => {
                metrics.record_rejected_closed();
                warn!(
                    request_id = %request_id,
                    "Dispatcher stopped - request rejected"
                );
                Admission::Closed
            }
        }
    }

    /// Close the queue for admission. Queued requests are still served and
    /// every worker chain unwinds once the queue is drained.
    ///
    /// Idempotent: returns `true` for the call that stopped the dispatcher and
    /// `false` (with a warning) for any later call.
    pub fn stop(&self) -> bool {
        if self.shared.queue.close() {
            info!(
                queued = self.shared.queue.len(),
                active_workers = self.shared.metrics.active_workers(),
                "Dispatcher stopped - draining"
            );
            true
        } else {
            warn!("Dispatcher already stopped - ignoring repeated stop");
            false
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.queue.is_closed()
    }

    #[must_use]
    pub fn state(&self) -> DispatcherState {
        if !self.shared.queue.is_closed() {
            DispatcherState::Open
        } else if self.shared.queue.is_empty() && self.shared.metrics.active_workers() == 0 {
            DispatcherState::Closed
        } else {
            DispatcherState::Closing
        }
    }

    /// Configured queue capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    /// Requests admitted but not yet picked up by a worker
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    #[must_use]
    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}
