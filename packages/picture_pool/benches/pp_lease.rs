//! Lease and return benchmarks for the `picture_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use picture_pool::{Chroma, PicturePool, VideoFormat};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

const FORMAT: VideoFormat = VideoFormat::new(Chroma::I420, 1920, 1080);
const POOL_SIZE: usize = 8;

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("pp_lease");

    let allocs_op = allocs.operation("get_and_return");
    group.bench_function("get_and_return", |b| {
        let pool = PicturePool::from_format(&FORMAT, POOL_SIZE).unwrap();

        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(pool.get()));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("get_until_exhausted");
    group.bench_function("get_until_exhausted", |b| {
        let pool = PicturePool::from_format(&FORMAT, POOL_SIZE).unwrap();

        b.iter_custom(|iters| {
            let mut leased = Vec::with_capacity(POOL_SIZE);

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                leased.extend(iter::from_fn(|| pool.get()));
                black_box(&leased);
                leased.clear();
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("reset_full");
    group.bench_function("reset_full", |b| {
        let pool = PicturePool::from_format(&FORMAT, POOL_SIZE).unwrap();

        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                for picture in iter::from_fn(|| pool.get()) {
                    // Abandoned on purpose, the reset reclaims it.
                    std::mem::forget(picture);
                }

                black_box(pool.reset());
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
