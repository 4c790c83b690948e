//! Benchmark of submit-to-complete admission throughput at several
//! concurrency levels.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use workyard::builders::SchedulerBuilder;
use workyard::core::{Job, JobSignals, WorkerStatus};

const BATCH: usize = 64;

struct InstantJob;

#[async_trait]
impl Job for InstantJob {
    fn size(&self) -> u64 {
        1
    }

    async fn handle(&self, signals: JobSignals) {
        signals.started();
        signals.complete();
    }

    async fn abort(&self) {}
}

async fn run_batch(concurrency: usize) {
    let scheduler = SchedulerBuilder::new()
        .concurrency(concurrency)
        .heartbeat(Duration::from_millis(1))
        .build()
        .unwrap();
    scheduler.startup();

    let workers: Vec<_> = (0..BATCH)
        .map(|_| scheduler.create(Arc::new(InstantJob)).unwrap())
        .collect();
    for outcome in scheduler.execute_all() {
        assert!(outcome.result.is_ok());
    }

    while !workers
        .iter()
        .all(|w| w.status() == WorkerStatus::Complete)
    {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    scheduler.shutdown();
}

fn bench_admission(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("admission");
    group.throughput(Throughput::Elements(BATCH as u64));

    for concurrency in [1_usize, 4, 16] {
        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&rt).iter(|| run_batch(concurrency));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_admission);
criterion_main!(benches);
