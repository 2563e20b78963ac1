#![allow(clippy::unwrap_used, clippy::expect_used)]

use brrtpipe::{
    prefix_suffix_worker, stage_fn, Admission, BackpressureMode, CompletionTracker, Dispatcher,
    DispatcherConfig, DispatcherState, Outcome, PoolError, Request, RequestId, StageError, Worker,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn init() {
    may::config().set_workers(2);
}

fn counting<P: Send + 'static>(calls: &Arc<AtomicUsize>, payload: P) -> Request<P> {
    let calls = Arc::clone(calls);
    Request::new(payload, move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
    })
}

/// Requests admitted before any worker exists are served in admission order
#[test]
fn test_admission_is_fifo() {
    init();
    let dispatcher = Dispatcher::new(8);
    let (tx, rx) = mpsc::channel();

    for n in 0..8_u32 {
        let tx = tx.clone();
        let admitted = dispatcher.make_request(Request::new(n, move |outcome: Outcome<u32>| {
            tx.send(outcome.into_payload().unwrap()).unwrap();
        }));
        assert_eq!(admitted, Admission::Admitted);
    }
    assert_eq!(dispatcher.queue_len(), 8);

    let worker = Worker::builder(1)
        .stage(stage_fn("identity", |n: u32| Ok(n)))
        .build()
        .unwrap();
    let handle = dispatcher.launch_worker(&worker).unwrap();

    dispatcher.stop();
    handle.join().unwrap();

    let order: Vec<u32> = rx.try_iter().collect();
    assert_eq!(order, (0..8).collect::<Vec<_>>());
}

/// Every admitted request gets exactly one callback, across two workers
#[test]
fn test_two_workers_complete_every_request_once() {
    init();
    let dispatcher = Dispatcher::new(16);
    let handles: Vec<_> = (1..=2)
        .map(|id| {
            let worker = prefix_suffix_worker::<String>(id, &format!("w{id}:"), "!").unwrap();
            dispatcher.launch_worker(&worker).unwrap()
        })
        .collect();

    let tracker = CompletionTracker::new();
    let calls: Arc<Vec<AtomicUsize>> = Arc::new((0..100).map(|_| AtomicUsize::new(0)).collect());
    let ids = Arc::new(Mutex::new(HashMap::<RequestId, usize>::new()));

    for n in 0..100 {
        let calls = Arc::clone(&calls);
        let request = Request::tracked(format!("r{n}"), &tracker, move |_| {
            calls[n].fetch_add(1, Ordering::SeqCst);
        });
        ids.lock().unwrap().insert(request.id(), n);
        assert!(dispatcher.make_request(request).is_admitted());
    }

    assert!(tracker.wait_timeout(Duration::from_secs(10)));
    dispatcher.stop();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(ids.lock().unwrap().len(), 100);
    assert!(calls.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    let metrics = dispatcher.metrics();
    assert_eq!(metrics.admitted, 100);
    assert_eq!(metrics.completed + metrics.failed, 100);
    assert_eq!(metrics.in_flight, 0);
    assert_eq!(dispatcher.state(), DispatcherState::Closed);
}

/// A slow request on one worker does not hold back completions on another
#[test]
fn test_workers_complete_independently() {
    init();
    let dispatcher = Dispatcher::new(4);
    let handles: Vec<_> = (1..=2)
        .map(|id| {
            let worker = Worker::builder(id)
                .stage(stage_fn("maybe_slow", |n: u32| {
                    if n == 0 {
                        may::coroutine::sleep(Duration::from_millis(300));
                    }
                    Ok(n)
                }))
                .build()
                .unwrap();
            dispatcher.launch_worker(&worker).unwrap()
        })
        .collect();

    let (tx, rx) = mpsc::channel();
    for n in 0..2_u32 {
        let tx = tx.clone();
        let request = Request::new(n, move |outcome: Outcome<u32>| {
            tx.send(outcome.into_payload().unwrap()).unwrap();
        });
        assert!(dispatcher.make_request(request).is_admitted());
    }

    let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!((first, second), (1, 0));

    dispatcher.stop();
    for handle in handles {
        handle.join().unwrap();
    }
}

/// Stopping keeps already admitted work alive until it has been served
#[test]
fn test_stop_drains_admitted_requests() {
    init();
    let dispatcher = Dispatcher::new(32);
    let worker = Worker::builder(1)
        .stage(stage_fn("slow", |n: u32| {
            may::coroutine::sleep(Duration::from_millis(1));
            Ok(n)
        }))
        .stage(stage_fn("inc", |n: u32| Ok(n + 1)))
        .build()
        .unwrap();
    let handle = dispatcher.launch_worker(&worker).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    for n in 0..20 {
        assert!(dispatcher.make_request(counting(&calls, n)).is_admitted());
    }

    assert!(dispatcher.stop());
    assert_eq!(
        dispatcher.make_request(counting(&calls, 99)),
        Admission::Closed
    );

    handle.join().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 20);
    assert_eq!(dispatcher.state(), DispatcherState::Closed);
    assert_eq!(dispatcher.metrics().rejected_closed, 1);
}

/// A full queue makes admission wait for the timeout and drop the request
#[test]
fn test_full_queue_times_out_without_callback() {
    init();
    let dispatcher = Dispatcher::new(2);
    let calls = Arc::new(AtomicUsize::new(0));
    let timeout = Duration::from_millis(50);

    assert!(dispatcher.make_request_timeout(counting(&calls, 1_u32), timeout).is_admitted());
    assert!(dispatcher.make_request_timeout(counting(&calls, 2_u32), timeout).is_admitted());

    let started = Instant::now();
    let outcome = dispatcher.make_request_timeout(counting(&calls, 3_u32), timeout);
    assert_eq!(outcome, Admission::TimedOut);
    assert!(started.elapsed() >= timeout);

    // Serve the two queued requests; the dropped one must stay silent.
    let worker = Worker::builder(1)
        .stage(stage_fn("noop", |n: u32| Ok(n)))
        .build()
        .unwrap();
    let handle = dispatcher.launch_worker(&worker).unwrap();
    dispatcher.stop();
    handle.join().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(dispatcher.metrics().timed_out, 1);
}

/// Three concurrent callers against two free slots: exactly one times out
#[test]
fn test_concurrent_admission_over_capacity() {
    init();
    let dispatcher: Dispatcher<u32> = Dispatcher::new(2);
    let calls = Arc::new(AtomicUsize::new(0));

    let callers: Vec<_> = (0..3_u32)
        .map(|n| {
            let dispatcher = dispatcher.clone();
            let calls = Arc::clone(&calls);
            thread::spawn(move || {
                dispatcher.make_request_timeout(counting(&calls, n), Duration::from_millis(100))
            })
        })
        .collect();
    let results: Vec<Admission> = callers.into_iter().map(|c| c.join().unwrap()).collect();

    let admitted = results.iter().filter(|a| a.is_admitted()).count();
    let timed_out = results.iter().filter(|a| **a == Admission::TimedOut).count();
    assert_eq!(admitted, 2);
    assert_eq!(timed_out, 1);
    assert_eq!(dispatcher.queue_len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Capacity 0 hands requests straight to a waiting worker
#[test]
fn test_zero_capacity_hand_off() {
    init();
    let dispatcher = Dispatcher::new(0);
    let worker = prefix_suffix_worker::<String>(1, "Y-", "-X").unwrap();
    let handle = dispatcher.launch_worker(&worker).unwrap();

    let (tx, rx) = mpsc::channel();
    let admitted = dispatcher.make_request(Request::new("ab".to_string(), move |outcome| {
        tx.send(outcome.into_payload()).unwrap();
    }));
    assert!(admitted.is_admitted());

    let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(result.as_deref(), Some("Y-AB-X"));

    dispatcher.stop();
    handle.join().unwrap();
}

/// With no consumer, a hand-off dispatcher cannot admit anything
#[test]
fn test_zero_capacity_without_worker_times_out() {
    init();
    let dispatcher: Dispatcher<u32> = Dispatcher::new(0);
    let calls = Arc::new(AtomicUsize::new(0));
    assert_eq!(
        dispatcher.make_request_timeout(counting(&calls, 1), Duration::from_millis(20)),
        Admission::TimedOut
    );
}

#[test]
fn test_shed_mode_refuses_immediately() {
    init();
    let config = DispatcherConfig {
        queue_capacity: 1,
        admission_timeout_ms: 10_000,
        backpressure_mode: BackpressureMode::Shed,
        ..DispatcherConfig::default()
    };
    let dispatcher: Dispatcher<u32> = Dispatcher::with_config(config);
    let calls = Arc::new(AtomicUsize::new(0));

    assert!(dispatcher.make_request(counting(&calls, 1)).is_admitted());
    let started = Instant::now();
    assert_eq!(dispatcher.make_request(counting(&calls, 2)), Admission::Full);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(dispatcher.metrics().shed, 1);
}

#[test]
fn test_stop_is_idempotent() {
    init();
    let dispatcher: Dispatcher<u32> = Dispatcher::new(1);
    assert!(dispatcher.stop());
    assert!(!dispatcher.stop());
    assert!(!dispatcher.clone().stop());
    assert!(dispatcher.is_stopped());
}

#[test]
fn test_launch_after_stop_is_refused() {
    init();
    let dispatcher = Dispatcher::new(1);
    dispatcher.stop();
    let worker = Worker::builder(1)
        .stage(stage_fn("noop", |n: u32| Ok(n)))
        .build()
        .unwrap();
    assert!(matches!(
        dispatcher.launch_worker(&worker),
        Err(PoolError::Stopped)
    ));
}

/// A panicking callback does not stop the worker from serving the next request
#[test]
fn test_callback_panic_is_isolated() {
    init();
    let dispatcher = Dispatcher::new(4);
    let worker = Worker::builder(1)
        .stage(stage_fn("noop", |n: u32| Ok(n)))
        .build()
        .unwrap();
    let handle = dispatcher.launch_worker(&worker).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let boom = Request::new(0_u32, |_| panic!("callback exploded"));
    assert!(dispatcher.make_request(boom).is_admitted());
    assert!(dispatcher.make_request(counting(&calls, 1)).is_admitted());

    dispatcher.stop();
    handle.join().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let metrics = dispatcher.metrics();
    assert_eq!(metrics.callback_panics, 1);
    assert_eq!(metrics.completed, 2);
}

/// A payload the first stage cannot handle fails without reaching later stages
#[test]
fn test_unexpected_payload_short_circuits() {
    init();
    let downstream = Arc::new(AtomicUsize::new(0));
    let downstream_stage = {
        let downstream = Arc::clone(&downstream);
        stage_fn("count", move |v: serde_json::Value| {
            downstream.fetch_add(1, Ordering::SeqCst);
            Ok(v)
        })
    };
    let worker = Worker::builder(1)
        .stage(brrtpipe::stages::Uppercase)
        .stage(downstream_stage)
        .build()
        .unwrap();

    let dispatcher = Dispatcher::new(4);
    let handle = dispatcher.launch_worker(&worker).unwrap();

    let (tx, rx) = mpsc::channel();
    for payload in [serde_json::json!(7), serde_json::json!("fine")] {
        let tx = tx.clone();
        let request = Request::new(payload, move |outcome: Outcome<serde_json::Value>| {
            tx.send(outcome).unwrap();
        });
        assert!(dispatcher.make_request(request).is_admitted());
    }

    dispatcher.stop();
    handle.join().unwrap();

    let outcomes: Vec<_> = rx.try_iter().collect();
    assert_eq!(outcomes.len(), 2);
    let failure = outcomes[0].failure().unwrap();
    assert_eq!(failure.stage, "uppercase");
    assert_eq!(failure.position, 0);
    assert!(matches!(failure.error, StageError::TypeMismatch { .. }));
    assert!(outcomes[1].is_completed());
    assert_eq!(downstream.load(Ordering::SeqCst), 1);
}

#[test]
fn test_independent_dispatchers() {
    init();
    let a: Dispatcher<u32> = Dispatcher::new(1);
    let b: Dispatcher<u32> = Dispatcher::new(1);
    a.stop();
    assert!(a.is_stopped());
    assert!(!b.is_stopped());
    let calls = Arc::new(AtomicUsize::new(0));
    assert!(b.make_request(counting(&calls, 1)).is_admitted());
}
