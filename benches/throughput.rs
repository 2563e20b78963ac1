use brrtpipe::queue::BoundedQueue;
use brrtpipe::{prefix_suffix_worker, CompletionTracker, Dispatcher, Request};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

const BATCH: usize = 1_000;

fn bench_queue(c: &mut Criterion) {
    let queue = BoundedQueue::new(BATCH);
    c.bench_function("queue_push_pop", |b| {
        b.iter(|| {
            for n in 0..BATCH {
                queue.try_push(n).ok();
            }
            while let Some(n) = queue.try_pop() {
                black_box(n);
            }
        })
    });
}

fn bench_pipeline(c: &mut Criterion) {
    may::config().set_workers(4);

    let mut group = c.benchmark_group("prefix_suffix_pipeline");
    group.throughput(Throughput::Elements(BATCH as u64));

    for workers in [1_usize, 2, 4] {
        let dispatcher = Dispatcher::new(256);
        let handles: Vec<_> = (1..=workers)
            .map(|id| {
                let worker = prefix_suffix_worker::<String>(id, "Worker -> ", " World")
                    .expect("build worker");
                dispatcher.launch_worker(&worker).expect("launch worker")
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, _| {
            b.iter(|| {
                let tracker = CompletionTracker::new();
                for n in 0..BATCH {
                    let request = Request::tracked(format!("hello {n}"), &tracker, |outcome| {
                        black_box(outcome);
                    });
                    black_box(dispatcher.make_request(request));
                }
                tracker.wait();
            })
        });

        dispatcher.stop();
        for handle in handles {
            handle.join().expect("join worker");
        }
    }
    group.finish();
}

criterion_group!(benches, bench_queue, bench_pipeline);
criterion_main!(benches);
