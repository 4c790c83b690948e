//! Worker lifecycle integration tests, driven through the scheduler.
//!
//! These validate:
//! - Full status history through a successful run
//! - Retry exhaustion with an always-failing job
//! - Cooperative cancellation, acknowledged and not
//! - Pause/resume routing back through admission
//! - Job errors surfacing via events, never via `execute`

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use workyard::builders::SchedulerBuilder;
use workyard::core::{
    EventKind, Job, JobSignals, RetryPolicy, Scheduler, SchedulerError, WorkerOptions,
    WorkerStatus,
};

// ============================================================================
// HELPERS
// ============================================================================

fn build_scheduler(concurrency: usize) -> Scheduler {
    SchedulerBuilder::new()
        .concurrency(concurrency)
        .heartbeat(Duration::from_millis(5))
        .ack_timeout(Duration::from_millis(200))
        .build()
        .unwrap()
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// TEST JOBS
// ============================================================================

/// Starts immediately, then waits for an external release or abort.
struct GatedJob {
    release: Notify,
    aborted: Notify,
}

impl GatedJob {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            release: Notify::new(),
            aborted: Notify::new(),
        })
    }

    fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl Job for GatedJob {
    fn size(&self) -> u64 {
        100
    }

    async fn handle(&self, signals: JobSignals) {
        signals.started();
        signals.progress(0.5);
        tokio::select! {
            () = self.release.notified() => signals.complete(),
            () = self.aborted.notified() => signals.cancelled(),
        }
    }

    async fn abort(&self) {
        self.aborted.notify_one();
    }
}

/// Fails every attempt, counting them.
struct AlwaysFailingJob {
    attempts: AtomicU32,
}

#[async_trait]
impl Job for AlwaysFailingJob {
    fn size(&self) -> u64 {
        1
    }

    async fn handle(&self, signals: JobSignals) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        signals.started();
        signals.error("disk on fire");
    }

    async fn abort(&self) {}
}

/// Starts, then ignores everything, abort included.
struct StubbornJob;

#[async_trait]
impl Job for StubbornJob {
    fn size(&self) -> u64 {
        1
    }

    async fn handle(&self, signals: JobSignals) {
        signals.started();
        std::future::pending::<()>().await;
    }

    async fn abort(&self) {}
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn successful_run_walks_the_full_status_history() {
    let scheduler = build_scheduler(1);
    scheduler.startup();

    let transitions: Arc<Mutex<Vec<(Option<WorkerStatus>, WorkerStatus)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let transitions2 = Arc::clone(&transitions);
    scheduler.on(EventKind::UpdateStatus, move |ev| {
        transitions2
            .lock()
            .push((ev.worker.prev_status(), ev.worker.status()));
    });

    let job = GatedJob::new();
    let worker = scheduler
        .create(Arc::clone(&job) as Arc<dyn Job>)
        .unwrap();
    scheduler.execute(worker.id()).unwrap();

    wait_until("worker running", || worker.status() == WorkerStatus::Running).await;
    job.release();
    wait_until("worker complete", || {
        worker.status() == WorkerStatus::Complete
    })
    .await;

    assert_eq!(worker.prev_status(), Some(WorkerStatus::Running));
    assert_eq!(
        *transitions.lock(),
        vec![
            (Some(WorkerStatus::Initialed), WorkerStatus::Pending),
            (Some(WorkerStatus::Pending), WorkerStatus::Running),
            (Some(WorkerStatus::Running), WorkerStatus::Complete),
        ]
    );
}

#[tokio::test]
async fn retry_exhaustion_fails_exactly_budget_plus_one_times() {
    let scheduler = build_scheduler(1);
    scheduler.startup();

    let statuses: Arc<Mutex<Vec<WorkerStatus>>> = Arc::new(Mutex::new(Vec::new()));
    let statuses2 = Arc::clone(&statuses);
    scheduler.on(EventKind::UpdateStatus, move |ev| {
        statuses2.lock().push(ev.worker.status());
    });

    let job = Arc::new(AlwaysFailingJob {
        attempts: AtomicU32::new(0),
    });
    let worker = scheduler
        .create_with_options(
            Arc::clone(&job) as Arc<dyn Job>,
            WorkerOptions {
                retries: 2,
                retry_policy: RetryPolicy {
                    retry_after_ms: 0,
                    retry_on_error: true,
                    retry_on_timeout: true,
                },
                ack_timeout: Duration::from_millis(200),
            },
        )
        .unwrap();
    scheduler.execute(worker.id()).unwrap();

    wait_until("three failed attempts", || {
        job.attempts.load(Ordering::SeqCst) == 3 && worker.status() == WorkerStatus::Error
    })
    .await;

    // No further retry once the budget is spent.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(job.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(worker.retries_remaining(), 0);
    assert_eq!(worker.status(), WorkerStatus::Error);

    assert_eq!(
        *statuses.lock(),
        vec![
            WorkerStatus::Pending,
            WorkerStatus::Running,
            WorkerStatus::Error,
            WorkerStatus::Pending,
            WorkerStatus::Running,
            WorkerStatus::Error,
            WorkerStatus::Pending,
            WorkerStatus::Running,
            WorkerStatus::Error,
        ]
    );
}

#[tokio::test]
async fn unacknowledged_abort_times_out_and_leaves_status_alone() {
    let scheduler = build_scheduler(1);
    scheduler.startup();

    let worker = scheduler.create(Arc::new(StubbornJob)).unwrap();
    scheduler.execute(worker.id()).unwrap();
    wait_until("worker running", || worker.status() == WorkerStatus::Running).await;

    let err = scheduler.cancel(worker.id()).await.unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::AckTimeout { op: "cancel", .. }
    ));
    // Cancellation is cooperative: the worker is not forced anywhere.
    assert_eq!(worker.status(), WorkerStatus::Running);
}

#[tokio::test]
async fn acknowledged_abort_cancels_the_worker() {
    let scheduler = build_scheduler(1);
    scheduler.startup();

    let job = GatedJob::new();
    let worker = scheduler
        .create(Arc::clone(&job) as Arc<dyn Job>)
        .unwrap();
    scheduler.execute(worker.id()).unwrap();
    wait_until("worker running", || worker.status() == WorkerStatus::Running).await;

    scheduler.cancel(worker.id()).await.unwrap();
    assert_eq!(worker.status(), WorkerStatus::Cancelled);
    assert_eq!(scheduler.running_count(), 0);
}

#[tokio::test]
async fn pause_frees_the_slot_and_resume_reenters_admission() {
    let scheduler = build_scheduler(1);
    scheduler.startup();

    let job_a = GatedJob::new();
    let job_b = GatedJob::new();
    let a = scheduler
        .create(Arc::clone(&job_a) as Arc<dyn Job>)
        .unwrap();
    let b = scheduler
        .create(Arc::clone(&job_b) as Arc<dyn Job>)
        .unwrap();

    scheduler.execute(a.id()).unwrap();
    wait_until("A running", || a.status() == WorkerStatus::Running).await;

    // Pausing A releases the only slot; B can now be admitted.
    scheduler.pause(a.id()).unwrap();
    assert_eq!(a.status(), WorkerStatus::Paused);
    assert_eq!(scheduler.running_count(), 0);

    scheduler.execute(b.id()).unwrap();
    wait_until("B running", || b.status() == WorkerStatus::Running).await;

    // Resume queues A behind the ceiling instead of jumping the fence.
    scheduler.resume(a.id()).unwrap();
    assert_eq!(a.status(), WorkerStatus::Pending);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(a.status(), WorkerStatus::Pending);
    assert!(scheduler.running_count() <= 1);

    job_b.release();
    wait_until("B complete", || b.status() == WorkerStatus::Complete).await;
    wait_until("A running again", || a.status() == WorkerStatus::Running).await;

    // Progress survived the pause/resume round trip.
    assert!((a.progress() - 0.5).abs() < f64::EPSILON);

    job_a.release();
    wait_until("A complete", || a.status() == WorkerStatus::Complete).await;
}

#[tokio::test]
async fn job_errors_surface_via_events_not_via_execute() {
    let scheduler = build_scheduler(1);
    scheduler.startup();

    let seen_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let seen_error2 = Arc::clone(&seen_error);
    scheduler.on(EventKind::Error, move |ev| {
        *seen_error2.lock() = ev.error.clone();
    });

    let worker = scheduler
        .create(Arc::new(AlwaysFailingJob {
            attempts: AtomicU32::new(0),
        }))
        .unwrap();

    // The failure is never raised here.
    scheduler.execute(worker.id()).unwrap();
    wait_until("worker errored", || worker.status() == WorkerStatus::Error).await;

    assert!(seen_error.lock().as_deref().unwrap().contains("disk on fire"));
    assert!(worker.last_error().unwrap().contains("disk on fire"));
}

#[tokio::test]
async fn pause_is_bookkeeping_only_and_late_completion_lands() {
    let scheduler = build_scheduler(1);
    scheduler.startup();

    let job = GatedJob::new();
    let worker = scheduler
        .create(Arc::clone(&job) as Arc<dyn Job>)
        .unwrap();
    scheduler.execute(worker.id()).unwrap();
    wait_until("worker running", || worker.status() == WorkerStatus::Running).await;

    scheduler.pause(worker.id()).unwrap();
    assert_eq!(worker.status(), WorkerStatus::Paused);

    // The job was never halted; releasing it completes the paused
    // worker directly.
    job.release();
    wait_until("worker complete", || {
        worker.status() == WorkerStatus::Complete
    })
    .await;
    assert_eq!(worker.prev_status(), Some(WorkerStatus::Paused));
    assert_eq!(scheduler.running_count(), 0);
}
