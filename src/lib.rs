//! # brrtpipe
//!
//! **brrtpipe** is a bounded, multi-stage worker pipeline built on the `may`
//! coroutine runtime.
//!
//! ## Overview
//!
//! Producers submit [`Request`]s (a payload plus a completion callback) to a
//! [`Dispatcher`]. The dispatcher holds them in one bounded queue shared by
//! every [`Worker`] launched on it. A worker is a fixed chain of [`Stage`]s,
//! each running in its own coroutine and handing the payload to the next over
//! a zero-capacity pipe. The last stage invokes the request's callback with the
//! fully transformed payload.
//!
//! ```text
//!                      ┌──────────── worker 1 ────────────┐
//!   make_request ──▶ queue ──▶ [stage] ──▶ [stage] ──▶ [stage] ──▶ callback
//!                      └──▶ [stage] ──▶ [stage] ──▶ [stage] ──▶ callback
//!                      └──────────── worker 2 ────────────┘
//! ```
//!
//! ## Architecture
//!
//! - **[`dispatcher`]** - Admission queue, worker attachment and shutdown
//! - **[`worker`]** - Stage chains and their coroutines
//! - **[`stage`]** - The [`Stage`] trait and closure-backed stages
//! - **[`stages`]** - Text stages and the prefix/suffix reference pipeline
//! - **[`request`]** - Requests, outcomes and completion callbacks
//! - **[`queue`]** - The bounded, closable queue underneath everything
//! - **[`tracker`]** - Waiting for a batch of requests to complete
//! - **[`runtime_config`]** - Configuration from defaults, files and environment
//! - **[`metrics`]** - Admission and completion counters
//! - **[`otel`]** - Structured logging setup
//!
//! ## Guarantees
//!
//! - An admitted request is taken by exactly one worker and its callback runs
//!   exactly once, with either the completed payload or the failing stage
//! - Within a worker, stages run in declaration order on every request
//! - At most `capacity` requests wait in the queue at any time
//! - After [`Dispatcher::stop`] no request is admitted; everything already
//!   queued is still served, then every worker chain exits
//!
//! ## Quick Start
//!
//! ```rust
//! use brrtpipe::{prefix_suffix_worker, CompletionTracker, Dispatcher, Request};
//!
//! may::config().set_workers(2);
//!
//! let dispatcher = Dispatcher::new(16);
//! let mut handles = Vec::new();
//! for id in 1..=3 {
//!     let worker = prefix_suffix_worker::<String>(id, &format!("Worker id: {id} -> "), " World")
//!         .unwrap();
//!     handles.push(dispatcher.launch_worker(&worker).unwrap());
//! }
//!
//! let tracker = CompletionTracker::new();
//! for n in 0..10 {
//!     let request = Request::tracked(format!("hello {n}"), &tracker, |outcome| {
//!         assert!(outcome.is_completed());
//!     });
//!     assert!(dispatcher.make_request(request).is_admitted());
//! }
//! tracker.wait();
//!
//! dispatcher.stop();
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//! ```

pub mod cli;
pub mod dispatcher;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod otel;
pub mod queue;
pub mod request;
pub mod runtime_config;
pub mod stage;
pub mod stages;
pub mod tracker;
pub mod worker;

pub use dispatcher::{Admission, Dispatcher, DispatcherState};
pub use error::{PoolError, StageError};
pub use ids::{RequestId, WorkerId};
pub use metrics::MetricsSnapshot;
pub use request::{Outcome, Request, StageFailure};
pub use runtime_config::{BackpressureMode, ConfigError, DispatcherConfig};
pub use stage::{stage_fn, Stage};
pub use stages::{prefix_suffix_worker, TextPayload};
pub use tracker::CompletionTracker;
pub use worker::{Worker, WorkerHandle, WorkerLauncher};
