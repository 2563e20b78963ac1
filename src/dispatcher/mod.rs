//! # Dispatcher Module
//!
//! The dispatcher owns the bounded admission queue shared by every worker
//! launched on it.
//!
//! ## Overview
//!
//! - [`Dispatcher::make_request`] enqueues a request, waiting up to the
//!   admission timeout for room (or refusing at once in shed mode)
//! - [`Dispatcher::launch_worker`] attaches a worker; all workers compete for
//!   requests on the one queue, and each request is taken by exactly one
//! - [`Dispatcher::stop`] closes admission; queued requests are still served
//!   and worker chains unwind once the queue is drained
//!
//! ## Admission
//!
//! The queue holds at most `capacity` requests that no worker has taken yet.
//! A capacity of `0` turns admission into a hand-off: `make_request` only
//! succeeds while some worker is parked waiting for input.
//!
//! A request that is not admitted is dropped and its callback never runs; the
//! returned [`Admission`] says why.
//!
//! ## Example
//!
//! ```rust
//! use brrtpipe::{prefix_suffix_worker, Dispatcher, Request};
//!
//! may::config().set_workers(2);
//!
//! let dispatcher = Dispatcher::new(8);
//! let worker = prefix_suffix_worker::<String>(1, "Worker id: 1 -> ", " World").unwrap();
//! let handle = dispatcher.launch_worker(&worker).unwrap();
//!
//! let (tx, rx) = std::sync::mpsc::channel();
//! let admitted = dispatcher.make_request(Request::new("hello".to_string(), move |outcome| {
//!     let _ = tx.send(outcome.into_payload());
//! }));
//! assert!(admitted.is_admitted());
//!
//! dispatcher.stop();
//! handle.join().unwrap();
//! assert_eq!(rx.recv().unwrap().as_deref(), Some("Worker id: 1 -> HELLO World"));
//! ```

mod core;

pub use core::{Admission, Dispatcher, DispatcherState};
