//! # Text Stages
//!
//! Ready-made stages for string pipelines, plus [`prefix_suffix_worker`],
//! the three-stage reference pipeline (uppercase, append suffix, prepend
//! prefix).
//!
//! The stages are generic over [`TextPayload`], so the same stage works on a
//! statically typed `String` pipeline and on dynamically typed payloads
//! (`serde_json::Value`, `Box<dyn Any + Send>`) where a non-string payload
//! fails the stage with [`StageError::TypeMismatch`].

use crate::error::{PoolError, StageError};
use crate::stage::Stage;
use crate::worker::Worker;
use serde_json::Value;
use std::any::Any;

/// A payload that may or may not hold text
pub trait TextPayload: Sized + Send + 'static {
    /// Take the text out of the payload, or report what was found instead
    fn into_text(self) -> Result<String, StageError>;

    /// Wrap text back into the payload type
    fn from_text(text: String) -> Self;
}

impl TextPayload for String {
    fn into_text(self) -> Result<String, StageError> {
        Ok(self)
    }

    fn from_text(text: String) -> Self {
        text
    }
}

impl TextPayload for Value {
    fn into_text(self) -> Result<String, StageError> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(StageError::TypeMismatch {
                expected: "string",
                found: json_kind(&other).to_string(),
            }),
        }
    }

    fn from_text(text: String) -> Self {
        Value::String(text)
    }
}

impl TextPayload for Box<dyn Any + Send> {
    fn into_text(self) -> Result<String, StageError> {
        match self.downcast::<String>() {
            Ok(s) => Ok(*s),
            Err(other) => match other.downcast::<&'static str>() {
                Ok(s) => Ok((*s).to_string()),
                Err(_) => Err(StageError::TypeMismatch {
                    expected: "string",
                    found: "non-string value".to_string(),
                }),
            },
        }
    }

    fn from_text(text: String) -> Self {
        Box::new(text)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Uppercases the payload text
#[derive(Debug, Clone, Copy, Default)]
pub struct Uppercase;

impl<P: TextPayload> Stage<P> for Uppercase {
    fn name(&self) -> &str {
        "uppercase"
    }

    fn apply(&self, payload: P) -> Result<P, StageError> {
        let text = payload.into_text()?;
        Ok(P::from_text(text.to_uppercase()))
    }
}

/// Appends a fixed suffix to the payload text
#[derive(Debug, Clone)]
pub struct AppendSuffix {
    suffix: String,
}

impl AppendSuffix {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}

impl<P: TextPayload> Stage<P> for AppendSuffix {
    fn name(&self) -> &str {
        "append_suffix"
    }

    fn apply(&self, payload: P) -> Result<P, StageError> {
        let mut text = payload.into_text()?;
        text.push_str(&self.suffix);
        Ok(P::from_text(text))
    }
}

/// Prepends a fixed prefix to the payload text
#[derive(Debug, Clone)]
pub struct PrependPrefix {
    prefix: String,
}

impl PrependPrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl<P: TextPayload> Stage<P> for PrependPrefix {
    fn name(&self) -> &str {
        "prepend_prefix"
    }

    fn apply(&self, payload: P) -> Result<P, StageError> {
        let text = payload.into_text()?;
        let mut out = String::with_capacity(self.prefix.len() + text.len());
        out.push_str(&self.prefix);
        out.push_str(&text);
        Ok(P::from_text(out))
    }
}

/// The reference pipeline: uppercase, then append `suffix`, then prepend `prefix`.
///
/// `"ab"` through `prefix_suffix_worker(1, "Y-", "-X")` completes as `"Y-AB-X"`.
pub fn prefix_suffix_worker<P: TextPayload>(
    id: usize,
    prefix: &str,
    suffix: &str,
) -> Result<Worker<P>, PoolError> {
    Worker::builder(id)
        .stage(Uppercase)
        .stage(AppendSuffix::new(suffix))
        .stage(PrependPrefix::new(prefix))
        .build()
}
