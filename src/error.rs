//! Error types for the pipeline runtime.
//!
//! Two families live here:
//!
//! - [`StageError`] is per-request. A stage returns it when a payload fails
//!   its precondition; the runtime turns it into
//!   [`Outcome::Failed`](crate::Outcome::Failed) and keeps the worker running.
//! - [`PoolError`] is structural. It is returned by worker construction and
//!   launch and never reaches a completion callback.

use crate::ids::WorkerId;
use std::fmt;
use std::io;

/// Reason a single request could not make it through a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// The payload is not of the shape the stage operates on
    TypeMismatch {
        /// What the stage expected (e.g. `"string"`)
        expected: &'static str,
        /// What it actually received
        found: String,
    },
    /// The stage understood the payload but refused it
    Rejected(String),
    /// The stage panicked while processing this payload
    Panicked(String),
    /// The next stage of the chain is gone, so the payload could not be handed on
    Disconnected,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::TypeMismatch { expected, found } => {
                write!(f, "payload type mismatch: expected {expected}, found {found}")
            }
            StageError::Rejected(reason) => write!(f, "payload rejected: {reason}"),
            StageError::Panicked(message) => write!(f, "stage panicked: {message}"),
            StageError::Disconnected => write!(f, "downstream stage disconnected"),
        }
    }
}

impl std::error::Error for StageError {}

/// Failure to build, launch or join a worker pipeline
#[derive(Debug)]
pub enum PoolError {
    /// A worker was built without any stage
    EmptyPipeline {
        /// The offending worker
        worker: WorkerId,
    },
    /// The dispatcher has been stopped and accepts no new workers
    Stopped,
    /// The coroutine runtime refused to spawn a stage coroutine
    Spawn {
        /// Worker being launched
        worker: WorkerId,
        /// Name of the stage whose coroutine failed to start
        stage: String,
        /// Underlying runtime error
        source: io::Error,
    },
    /// A stage coroutine terminated abnormally
    Join {
        /// Worker being joined
        worker: WorkerId,
        /// Name of the stage whose coroutine panicked
        stage: String,
    },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::EmptyPipeline { worker } => {
                write!(f, "{worker} has no stages; a pipeline needs at least one")
            }
            PoolError::Stopped => write!(f, "dispatcher is stopped"),
            PoolError::Spawn {
                worker,
                stage,
                source,
            } => write!(
                f,
                "failed to spawn coroutine for stage '{stage}' of {worker}: {source}"
            ),
            PoolError::Join { worker, stage } => {
                write!(f, "stage '{stage}' of {worker} terminated abnormally")
            }
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PoolError::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Render a `catch_unwind` payload as text for logs and [`StageError::Panicked`]
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
