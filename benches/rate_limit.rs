//! Rate limiter and retry policy benchmarks
//!
//! Measures the per-request overhead of the shared token bucket and of the
//! backoff calculation, both of which sit on every outbound request.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use igscraper::downloader::rate_limit::RateLimiter;
use igscraper::downloader::retry::{ClassPolicy, ErrorClass, RetryPolicy};
use igscraper::shutdown::CancelHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Uncontended `try_acquire` against a bucket that never runs dry
fn bench_try_acquire(c: &mut Criterion) {
    let limiter = RateLimiter::new(u32::MAX / 2, 1_000_000);
    c.bench_function("try_acquire", |b| b.iter(|| black_box(limiter.try_acquire(1))));
}

/// `acquire` from several tasks sharing one bucket
fn bench_contended_acquire(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let mut group = c.benchmark_group("contended_acquire");

    for tasks in [1usize, 4, 10] {
        group.bench_with_input(BenchmarkId::from_parameter(tasks), &tasks, |b, &tasks| {
            b.to_async(&runtime).iter(|| async move {
                let limiter = Arc::new(RateLimiter::new(u32::MAX / 2, 1_000_000));
                let cancel = CancelHandle::new();
                let mut set = tokio::task::JoinSet::new();
                for _ in 0..tasks {
                    let limiter = Arc::clone(&limiter);
                    let cancel = cancel.clone();
                    set.spawn(async move {
                        for _ in 0..100 {
                            let _ = limiter.acquire(1, &cancel).await;
                        }
                    });
                }
                while set.join_next().await.is_some() {}
            });
        });
    }
    group.finish();
}

fn bench_backoff(c: &mut Criterion) {
    let policy = RetryPolicy::new(
        ClassPolicy::new(5, Duration::from_secs(1)),
        ClassPolicy::new(3, Duration::from_secs(60)),
        ClassPolicy::new(3, Duration::from_secs(2)),
    )
    .with_jitter(0.2);
    c.bench_function("backoff_with_jitter", |b| {
        b.iter(|| {
            for failure in 1..=5 {
                black_box(policy.backoff(ErrorClass::Network, black_box(failure)));
            }
        })
    });
}

criterion_group!(benches, bench_try_acquire, bench_contended_acquire, bench_backoff);
criterion_main!(benches);
