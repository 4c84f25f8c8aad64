//! Benchmark: stop-the-world mark and sweep pause components.
//!
//! Runs the mark pass and the sweep directly on a heap, without the GC
//! thread, so only the collector's own work is measured.

use std::hint::black_box;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use stw_gc::heap::allocate;
use stw_gc::{GcHandle, Heap, MarkQueue, ObjRef, SingleThreadMark, Trace};

#[derive(Trace)]
struct Node {
    value: i64,
    next: Option<ObjRef>,
}

/// A heap holding a live list of `live` nodes and `garbage` unreachable ones.
fn build_heap(live: usize, garbage: usize) -> (Heap, ObjRef) {
    let mut heap = Heap::new(usize::MAX);
    let mut head = allocate(&mut heap, Node { value: 0, next: None }).unwrap();
    for i in 1..live {
        head = allocate(
            &mut heap,
            Node {
                value: i as i64,
                next: Some(head),
            },
        )
        .unwrap();
    }
    for i in 0..garbage {
        allocate(
            &mut heap,
            Node {
                value: i as i64,
                next: None,
            },
        )
        .unwrap();
    }
    (heap, head)
}

fn mark(heap: &mut Heap, root: ObjRef, epoch: u64) {
    let mut queue = MarkQueue::new();
    let mut marker = SingleThreadMark::new();
    marker.setup_before_stw(GcHandle::new(epoch));
    let stats = marker.mark_in_stw(heap, &mut queue, &[root][..], &mut |_| true);
    black_box(stats);
}

fn bench_mark(c: &mut Criterion) {
    let mut group = c.benchmark_group("mark");
    for size in [1_000, 10_000, 100_000] {
        let (mut heap, root) = build_heap(size, 0);
        let mut epoch = 0;
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                epoch += 1;
                mark(&mut heap, root, epoch);
                // Reset mark bits for the next iteration.
                black_box(heap.sweep(&MarkQueue::new()));
            });
        });
    }
    group.finish();
}

fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");
    group.measurement_time(Duration::from_secs(10));
    for size in [1_000, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::new("half_garbage", size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let (mut heap, root) = build_heap(size / 2, size / 2);
                    mark(&mut heap, root, 1);
                    heap
                },
                |mut heap| black_box(heap.sweep(&MarkQueue::new())),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_mark, bench_sweep);
criterion_main!(benches);
