//! # Request Module
//!
//! The unit of work carried through a pipeline: a payload, a completion
//! callback and a [`RequestId`] for log correlation.
//!
//! ## Completion contract
//!
//! The callback is an `FnOnce`, owned by a [`Completion`] that is consumed by
//! [`Completion::invoke`]. A request therefore completes at most once: either
//! with [`Outcome::Completed`] carrying the fully transformed payload, or with
//! [`Outcome::Failed`] naming the stage that gave up on it. A request that is
//! never admitted is dropped and its callback never runs.
//!
//! Callback panics are caught per invocation so that one misbehaving callback
//! cannot take down the stage coroutine serving other requests.

use crate::error::{panic_message, StageError};
use crate::ids::RequestId;
use crate::tracker::{CompletionTracker, TrackerGuard};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

/// Boxed completion callback
pub type OnComplete<P> = Box<dyn FnOnce(Outcome<P>) + Send + 'static>;

/// Where in the chain a request failed, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    /// Name of the failing stage
    pub stage: String,
    /// Zero-based position of the stage in its worker
    pub position: usize,
    /// What went wrong
    pub error: StageError,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stage '{}' (#{}) failed: {}",
            self.stage, self.position, self.error
        )
    }
}

impl std::error::Error for StageFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Final result delivered to a completion callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<P> {
    /// Every stage accepted the payload; this is the last stage's output
    Completed(P),
    /// A stage refused the payload and the chain short-circuited
    Failed(StageFailure),
}

impl<P> Outcome<P> {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// The final payload, if the request completed
    #[must_use]
    pub fn into_payload(self) -> Option<P> {
        match self {
            Outcome::Completed(payload) => Some(payload),
            Outcome::Failed(_) => None,
        }
    }

    /// The failure, if the request failed
    #[must_use]
    pub fn failure(&self) -> Option<&StageFailure> {
        match self {
            Outcome::Completed(_) => None,
            Outcome::Failed(failure) => Some(failure),
        }
    }

    /// Convert into a `Result`
    pub fn into_result(self) -> Result<P, StageFailure> {
        match self {
            Outcome::Completed(payload) => Ok(payload),
            Outcome::Failed(failure) => Err(failure),
        }
    }
}

/// The once-only half of a request: its callback and tracker registration
pub struct Completion<P> {
    request_id: RequestId,
    callback: OnComplete<P>,
    // Dropped after the callback has run (or with the request if never admitted).
    _tracked: Option<TrackerGuard>,
}

impl<P> Completion<P> {
    /// Request this completion belongs to
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Run the callback, isolating any panic it raises.
    ///
    /// Returns the panic message if the callback panicked.
    pub fn invoke(self, outcome: Outcome<P>) -> Result<(), String> {
        let Completion {
            request_id,
            callback,
            _tracked,
        } = self;

        let result = catch_unwind(AssertUnwindSafe(move || callback(outcome)));
        drop(_tracked);

        result.map_err(|panic| {
            let panic_message = panic_message(&*panic);
            error!(
                request_id = %request_id,
                panic_message = %panic_message,
                "Completion callback panicked - isolated"
            );
            panic_message
        })
    }
}

impl<P> fmt::Debug for Completion<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("request_id", &self.request_id)
            .field("tracked", &self._tracked.is_some())
            .finish_non_exhaustive()
    }
}

/// A unit of work: payload plus completion callback
pub struct Request<P> {
    id: RequestId,
    payload: P,
    completion: Completion<P>,
}

impl<P> Request<P> {
    /// Create a request whose callback runs exactly once if it is admitted
    pub fn new<F>(payload: P, on_complete: F) -> Self
    where
        F: FnOnce(Outcome<P>) + Send + 'static,
    {
        Self::build(payload, Box::new(on_complete), None)
    }

    /// Create a request registered with `tracker`.
    ///
    /// The tracker is released after the callback returns, or when the
    /// request is dropped without being admitted, so a caller can wait for a
    /// full drain after stopping the dispatcher.
    pub fn tracked<F>(payload: P, tracker: &CompletionTracker, on_complete: F) -> Self
    where
        F: FnOnce(Outcome<P>) + Send + 'static,
    {
        Self::build(payload, Box::new(on_complete), Some(tracker.register()))
    }

    fn build(payload: P, callback: OnComplete<P>, tracked: Option<TrackerGuard>) -> Self {
        let id = RequestId::new();
        Self {
            id,
            payload,
            completion: Completion {
                request_id: id,
                callback,
                _tracked: tracked,
            },
        }
    }

    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    #[must_use]
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Split into payload and completion so a stage can consume the payload
    pub fn into_parts(self) -> (P, Completion<P>) {
        (self.payload, self.completion)
    }

    /// Reassemble a request from a transformed payload and its completion
    pub fn from_parts(payload: P, completion: Completion<P>) -> Self {
        Self {
            id: completion.request_id,
            payload,
            completion,
        }
    }
}

impl<P: fmt::Debug> fmt::Debug for Request<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}
