//! # Worker Module
//!
//! A [`Worker`] is an ordered chain of [`Stage`]s bound to an input queue.
//! Launching it spawns one `may` coroutine per stage:
//!
//! ```text
//!   shared queue ──▶ [stage 0] ──pipe──▶ [stage 1] ──pipe──▶ [stage 2] ──▶ callback
//! ```
//!
//! ## Pipes
//!
//! Consecutive stages are connected by zero-capacity [`BoundedQueue`]s, so a
//! stage only hands an item on while its successor is waiting for one. Each
//! stage processes one request at a time; a slow stage back-pressures every
//! stage in front of it, and ultimately the shared queue.
//!
//! ## Failure policy
//!
//! When a stage returns a [`StageError`] (or panics) the chain short-circuits
//! for that request only: the stage invokes the completion callback with
//! [`Outcome::Failed`] itself and moves on to the next item.
//!
//! ## Termination
//!
//! When a stage's input is closed and drained it closes its own output,
//! cascading closure down the chain. The last stage has no output; it simply
//! stops, and its exit marks the worker as finished.
//!
//! ## Startup
//!
//! Coroutines are spawned from the last stage to the first. If a spawn fails
//! the pipes of the already running downstream stages are closed so they
//! unwind, and the shared queue is never consumed by a half-built chain.

use crate::error::{panic_message, PoolError, StageError};
use crate::ids::WorkerId;
use crate::metrics::DispatcherMetrics;
use crate::queue::BoundedQueue;
use crate::request::{Completion, Outcome, Request, StageFailure};
use crate::stage::Stage;
use may::coroutine::{self, JoinHandle};
use std::fmt;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Queue of requests a worker consumes from
pub type RequestQueue<P> = BoundedQueue<Request<P>>;

/// Default coroutine stack size for stage coroutines
pub const DEFAULT_STACK_SIZE: usize = 0x10000;

/// Runtime resources handed to a worker at launch
#[derive(Debug, Clone)]
pub struct LaunchContext {
    /// Stack size for every stage coroutine
    pub stack_size: usize,
    /// Counters the worker reports completions and failures to
    pub metrics: Arc<DispatcherMetrics>,
}

impl LaunchContext {
    /// Context with the given stage stack size, reporting to `metrics`
    #[must_use]
    pub fn new(stack_size: usize, metrics: Arc<DispatcherMetrics>) -> Self {
        Self {
            stack_size,
            metrics,
        }
    }
}

impl Default for LaunchContext {
    fn default() -> Self {
        Self::new(DEFAULT_STACK_SIZE, Arc::new(DispatcherMetrics::new()))
    }
}

/// Something that can start consuming requests from a queue
pub trait WorkerLauncher<P>: Send + Sync {
    /// Identifier used in logs
    fn id(&self) -> WorkerId;

    /// Start consuming from `input`
    fn launch(
        &self,
        input: Arc<RequestQueue<P>>,
        ctx: &LaunchContext,
    ) -> Result<WorkerHandle, PoolError>;
}

/// Ordered, immutable chain of stages
pub struct Worker<P> {
    id: WorkerId,
    stages: Vec<Arc<dyn Stage<P>>>,
}

impl<P> Clone for Worker<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            stages: self.stages.iter().map(Arc::clone).collect(),
        }
    }
}

impl<P> fmt::Debug for Worker<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl<P> Worker<P> {
    /// Start describing a worker with the given id
    #[must_use]
    pub fn builder(id: usize) -> WorkerBuilder<P> {
        WorkerBuilder {
            id: WorkerId(id),
            stages: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Number of stages (and coroutines once launched)
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false: [`WorkerBuilder::build`] refuses empty chains
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in chain order
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

/// Builder for [`Worker`]
pub struct WorkerBuilder<P> {
    id: WorkerId,
    stages: Vec<Arc<dyn Stage<P>>>,
}

impl<P> WorkerBuilder<P> {
    /// Append a stage to the end of the chain
    #[must_use]
    pub fn stage<S>(mut self, stage: S) -> Self
    where
        S: Stage<P> + 'static,
    {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Append a stage that is shared with other workers
    #[must_use]
    pub fn shared_stage(mut self, stage: Arc<dyn Stage<P>>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Freeze the chain. Fails if no stage was added.
    pub fn build(self) -> Result<Worker<P>, PoolError> {
        if self.stages.is_empty() {
            return Err(PoolError::EmptyPipeline { worker: self.id });
        }
        Ok(Worker {
            id: self.id,
            stages: self.stages,
        })
    }
}

impl<P: Send + 'static> WorkerLauncher<P> for Worker<P> {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn launch(
        &self,
        input: Arc<RequestQueue<P>>,
        ctx: &LaunchContext,
    ) -> Result<WorkerHandle, PoolError> {
        let count = self.stages.len();
        if count == 0 {
            return Err(PoolError::EmptyPipeline { worker: self.id });
        }

        // pipes[i] carries requests from stage i to stage i + 1
        let pipes: Vec<Arc<RequestQueue<P>>> = (1..count)
            .map(|_| Arc::new(BoundedQueue::new(0)))
            .collect();

        ctx.metrics.worker_started();
        let mut handles = Vec::with_capacity(count);

        for position in (0..count).rev() {
            let stage = Arc::clone(&self.stages[position]);
            let stage_name = stage.name().to_string();
            let source = if position == 0 {
                Arc::clone(&input)
            } else {
                Arc::clone(&pipes[position - 1])
            };
            let link = StageLink {
                worker: self.id,
                position,
                stage,
                source,
                sink: pipes.get(position).map(Arc::clone),
                metrics: Arc::clone(&ctx.metrics),
            };

            match spawn_stage(link, &stage_name, ctx.stack_size) {
                Ok(handle) => handles.push((stage_name, handle)),
                Err(err) => {
                    error!(
                        worker_id = %self.id,
                        stage = %stage_name,
                        position = position,
                        error = %err,
                        "Failed to spawn stage coroutine - CRITICAL"
                    );
                    for pipe in &pipes[position..] {
                        pipe.close();
                    }
                    if position + 1 == count {
                        // Nothing spawned yet, so no last stage will report the exit.
                        ctx.metrics.worker_exited();
                    }
                    return Err(PoolError::Spawn {
                        worker: self.id,
                        stage: stage_name,
                        source: err,
                    });
                }
            }
        }
        handles.reverse();

        info!(
            worker_id = %self.id,
            stages = ?self.stage_names(),
            stack_size = ctx.stack_size,
            "Worker launched"
        );

        Ok(WorkerHandle {
            worker: self.id,
            stages: handles,
        })
    }
}

#[allow(unsafe_code)]
fn spawn_stage<P: Send + 'static>(
    link: StageLink<P>,
    stage_name: &str,
    stack_size: usize,
) -> io::Result<JoinHandle<()>> {
    let name = format!("{}-{}", link.worker, stage_name);
    // SAFETY: may::coroutine::Builder::spawn() is unsafe because a coroutine must not
    // block its runtime thread on std primitives or rely on thread-local state. The stage
    // loop only suspends on may::sync primitives (BoundedQueue); the closure owns all of
    // its state, which is Send + 'static.
    unsafe {
        coroutine::Builder::new()
            .name(name)
            .stack_size(stack_size)
            .spawn(move || link.run())
    }
}

/// Handle to the coroutines of a launched worker
pub struct WorkerHandle {
    worker: WorkerId,
    stages: Vec<(String, JoinHandle<()>)>,
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("WorkerHandle")
            .field("worker", &self.worker)
            .field("stages", &names)
            .finish()
    }
}

impl WorkerHandle {
    #[must_use]
    pub fn worker_id(&self) -> WorkerId {
        self.worker
    }

    /// Number of stage coroutines
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Wait for every stage coroutine to exit.
    ///
    /// Only returns once the input queue has been closed and drained and the
    /// closure has cascaded through the whole chain.
    pub fn join(self) -> Result<(), PoolError> {
        let mut first_error = None;
        for (stage, handle) in self.stages {
            if handle.join().is_err() && first_error.is_none() {
                first_error = Some(PoolError::Join {
                    worker: self.worker,
                    stage,
                });
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Everything one stage coroutine owns
struct StageLink<P> {
    worker: WorkerId,
    position: usize,
    stage: Arc<dyn Stage<P>>,
    source: Arc<RequestQueue<P>>,
    sink: Option<Arc<RequestQueue<P>>>,
    metrics: Arc<DispatcherMetrics>,
}

impl<P> StageLink<P> {
    fn run(self) {
        debug!(
            worker_id = %self.worker,
            stage = %self.stage.name(),
            position = self.position,
            "Stage coroutine start"
        );

        while let Some(request) = self.source.pop() {
            let request_id = request.id();
            let (payload, completion) = request.into_parts();

            match self.apply(payload) {
                Ok(payload) => match &self.sink {
                    Some(sink) => {
                        if let Err(rejected) = sink.push(Request::from_parts(payload, completion)) {
                            warn!(
                                request_id = %request_id,
                                worker_id = %self.worker,
                                stage = %self.stage.name(),
                                "Next stage is gone - failing request"
                            );
                            let (_, completion) = rejected.into_inner().into_parts();
                            self.fail(completion, StageError::Disconnected);
                        }
                    }
                    None => {
                        debug!(
                            request_id = %request_id,
                            worker_id = %self.worker,
                            "Request completed"
                        );
                        self.finish(completion, Outcome::Completed(payload));
                    }
                },
                Err(error) => {
                    warn!(
                        request_id = %request_id,
                        worker_id = %self.worker,
                        stage = %self.stage.name(),
                        position = self.position,
                        error = %error,
                        "Stage failed - short-circuiting request"
                    );
                    self.fail(completion, error);
                }
            }
        }

        match &self.sink {
            Some(sink) => {
                sink.close();
            }
            None => self.metrics.worker_exited(),
        }

        debug!(
            worker_id = %self.worker,
            stage = %self.stage.name(),
            position = self.position,
            "Stage coroutine exiting"
        );
    }

    fn apply(&self, payload: P) -> Result<P, StageError> {
        match catch_unwind(AssertUnwindSafe(|| self.stage.apply(payload))) {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&*panic);
                error!(
                    worker_id = %self.worker,
                    stage = %self.stage.name(),
                    position = self.position,
                    panic_message = %message,
                    "Stage panicked - CRITICAL"
                );
                Err(StageError::Panicked(message))
            }
        }
    }

    fn fail(&self, completion: Completion<P>, error: StageError) {
        let failure = StageFailure {
            stage: self.stage.name().to_string(),
            position: self.position,
            error,
        };
        self.finish(completion, Outcome::Failed(failure));
    }

    fn finish(&self, completion: Completion<P>, outcome: Outcome<P>) {
        if outcome.is_completed() {
            self.metrics.record_completed();
        } else {
            self.metrics.record_failed();
        }
        if completion.invoke(outcome).is_err() {
            self.metrics.record_callback_panic();
        }
    }
}
