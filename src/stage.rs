//! # Stage Module
//!
//! A [`Stage`] is one transformation step of a worker pipeline. It receives
//! the payload produced by its predecessor and returns either the payload to
//! hand to its successor or a [`StageError`] that short-circuits the chain for
//! that request.
//!
//! Stages run inside their own coroutine and may be shared between several
//! workers, so they must be `Send + Sync`. Configuration a stage carries (a
//! prefix, a suffix, a lookup table) is read-only once the stage is built.
//!
//! ```rust
//! use brrtpipe::{stage_fn, Stage, StageError};
//!
//! let double = stage_fn("double", |n: u64| {
//!     n.checked_mul(2)
//!         .ok_or_else(|| StageError::Rejected("overflow".to_string()))
//! });
//! assert_eq!(double.name(), "double");
//! assert_eq!(double.apply(21), Ok(42));
//! ```

use crate::error::StageError;
use std::fmt;
use std::sync::Arc;

/// One transformation step of a worker pipeline
pub trait Stage<P>: Send + Sync {
    /// Name used in logs and in [`StageFailure`](crate::StageFailure)
    fn name(&self) -> &str;

    /// Transform the payload, or explain why it cannot be
    fn apply(&self, payload: P) -> Result<P, StageError>;
}

impl<P, S> Stage<P> for Arc<S>
where
    S: Stage<P> + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn apply(&self, payload: P) -> Result<P, StageError> {
        (**self).apply(payload)
    }
}

/// Stage backed by a closure
pub struct FnStage<F> {
    name: String,
    f: F,
}

impl<F> fmt::Debug for FnStage<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

impl<P, F> Stage<P> for FnStage<F>
where
    F: Fn(P) -> Result<P, StageError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, payload: P) -> Result<P, StageError> {
        (self.f)(payload)
    }
}

/// Build a named stage from a closure
pub fn stage_fn<P, F>(name: impl Into<String>, f: F) -> FnStage<F>
where
    F: Fn(P) -> Result<P, StageError> + Send + Sync,
{
    FnStage {
        name: name.into(),
        f,
    }
}
