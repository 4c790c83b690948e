//! Worker: the per-job lifecycle state machine.
//!
//! A worker wraps exactly one [`Job`] with status tracking, progress
//! and speed estimation, acknowledgment deadlines for start/cancel,
//! and an automatic retry budget. Status may only move through the
//! table in [`WorkerStatus::can_transition_to`]; every transition is
//! broadcast on the worker's event channel with the bookkeeping event
//! (`update:status`) delivered before anything else observes it.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::core::events::{Channel, EventKind, SubscriptionId};
use crate::core::job::{Job, JobSignals};
use crate::core::status::WorkerStatus;
use crate::core::SchedulerError;
use crate::runtime::Spawn;
use crate::util::clock;

/// Unique worker identifier, assigned at creation and never reused
/// within a registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct WorkerId(
    /// Raw numeric id.
    pub u64,
);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Automatic retry configuration, fixed at worker creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before a failed worker re-enters the pending queue.
    pub retry_after_ms: u64,
    /// Retry after the job reports a failure.
    pub retry_on_error: bool,
    /// Retry after the job reports its own timeout.
    pub retry_on_timeout: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_after_ms: 1_000,
            retry_on_error: true,
            retry_on_timeout: true,
        }
    }
}

impl RetryPolicy {
    pub(crate) const fn retry_after(&self) -> Duration {
        Duration::from_millis(self.retry_after_ms)
    }
}

/// Per-worker creation options.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Automatic retry budget.
    pub retries: u32,
    /// Retry behavior.
    pub retry_policy: RetryPolicy,
    /// Deadline for the job to acknowledge `run` and `cancel`.
    pub ack_timeout: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            retries: 0,
            retry_policy: RetryPolicy::default(),
            ack_timeout: Duration::from_millis(3_000),
        }
    }
}

/// Snapshot payload delivered to worker-level event subscribers.
#[derive(Debug, Clone)]
pub struct WorkerEvent {
    /// The notification this payload was delivered under.
    pub kind: EventKind,
    /// Originating worker.
    pub id: WorkerId,
    /// Status after the triggering change.
    pub status: WorkerStatus,
    /// Status before the triggering change.
    pub prev_status: Option<WorkerStatus>,
    /// Progress after the triggering change, in `[0, 1]`.
    pub progress: f64,
    /// Error detail for `error` notifications.
    pub error: Option<String>,
}

struct WorkerState {
    status: WorkerStatus,
    prev_status: Option<WorkerStatus>,
    progress: f64,
    retries_remaining: u32,
    last_error: Option<String>,
    created_at_ms: u128,
    updated_at_ms: u128,
    run_started_at: Option<Instant>,
    /// True while a `Job::handle` invocation is live. Pause does not
    /// halt the job, so a resumed worker must reattach to the running
    /// invocation instead of spawning a second one.
    handle_in_flight: bool,
}

/// Shared core of a worker; `Worker` handles are cheap clones over it.
pub(crate) struct WorkerShared {
    id: WorkerId,
    job: Arc<dyn Job>,
    options: WorkerOptions,
    state: Mutex<WorkerState>,
    events: Channel<WorkerEvent>,
    start_ack: Mutex<Option<oneshot::Sender<()>>>,
    cancel_ack: Mutex<Option<oneshot::Sender<()>>>,
    spawner: Arc<dyn Spawn>,
    // Self-reference handed to job signals and retry timers so neither
    // can keep a removed worker alive.
    weak_self: Weak<WorkerShared>,
}

impl WorkerShared {
    fn snapshot(&self, kind: EventKind, state: &WorkerState) -> WorkerEvent {
        WorkerEvent {
            kind,
            id: self.id,
            status: state.status,
            prev_status: state.prev_status,
            progress: state.progress,
            error: state.last_error.clone(),
        }
    }

    fn emit_as(&self, kind: EventKind, base: &WorkerEvent) {
        let payload = WorkerEvent {
            kind,
            ..base.clone()
        };
        self.events.emit(kind, &payload);
    }

    /// Apply a status transition and broadcast it.
    ///
    /// Emission order is fixed: `update:status` first (scheduler
    /// bookkeeping), then the trigger-specific notification, then
    /// `finish` for terminal entries, then `update`.
    fn transition(
        &self,
        to: WorkerStatus,
        trigger: Option<EventKind>,
        error: Option<String>,
    ) -> Result<(), SchedulerError> {
        let base = {
            let mut state = self.state.lock();
            let from = state.status;
            if !from.can_transition_to(to) {
                return Err(SchedulerError::InvalidState {
                    id: self.id,
                    status: from,
                });
            }
            state.prev_status = Some(from);
            state.status = to;
            state.updated_at_ms = clock::now_ms();
            match to {
                // Progress survives a pause/resume round trip only.
                WorkerStatus::Pending if from != WorkerStatus::Paused => {
                    state.progress = 0.0;
                }
                WorkerStatus::Running => {
                    state.run_started_at = Some(Instant::now());
                }
                _ => {}
            }
            if to.is_terminal() {
                state.handle_in_flight = false;
            }
            if let Some(detail) = &error {
                state.last_error = Some(detail.clone());
            }
            let mut base = self.snapshot(EventKind::UpdateStatus, &state);
            base.error = error;
            base
        };

        debug!(
            worker = %self.id,
            from = %base.prev_status.map_or("none".to_string(), |s| s.to_string()),
            to = %to,
            "worker transition"
        );

        self.emit_as(EventKind::UpdateStatus, &base);
        if let Some(kind) = trigger {
            self.emit_as(kind, &base);
        }
        if to.is_terminal() {
            self.emit_as(EventKind::Finish, &base);
        }
        self.emit_as(EventKind::Update, &base);
        Ok(())
    }

    fn fire_start_ack(&self) {
        if let Some(tx) = self.start_ack.lock().take() {
            let _ = tx.send(());
        }
    }

    fn fire_cancel_ack(&self) {
        if let Some(tx) = self.cancel_ack.lock().take() {
            let _ = tx.send(());
        }
    }

    // ------------------------------------------------------------------
    // Job signal surface (called through JobSignals)
    // ------------------------------------------------------------------

    pub(crate) fn signal_started(&self) {
        self.fire_start_ack();
    }

    pub(crate) fn signal_progress(&self, ratio: f64) {
        let ratio = ratio.clamp(0.0, 1.0);
        let base = {
            let mut state = self.state.lock();
            // Progress is meaningful while the job is in flight; a
            // paused worker's job keeps working, so it still counts.
            if !matches!(state.status, WorkerStatus::Running | WorkerStatus::Paused) {
                debug!(worker = %self.id, status = %state.status, "progress signal dropped");
                return;
            }
            state.progress = ratio;
            state.updated_at_ms = clock::now_ms();
            self.snapshot(EventKind::Progress, &state)
        };
        self.emit_as(EventKind::Progress, &base);
        self.emit_as(EventKind::Update, &base);
    }

    pub(crate) fn signal_complete(&self) {
        self.fire_start_ack();
        if let Err(err) = self.transition(WorkerStatus::Complete, Some(EventKind::Complete), None)
        {
            debug!(worker = %self.id, %err, "late complete signal dropped");
        }
    }

    pub(crate) fn signal_error(&self, detail: String) {
        self.fire_start_ack();
        match self.transition(
            WorkerStatus::Error,
            Some(EventKind::Error),
            Some(detail.clone()),
        ) {
            Ok(()) => self.maybe_schedule_retry(EventKind::Error),
            Err(err) => debug!(worker = %self.id, %err, "late error signal dropped"),
        }
    }

    pub(crate) fn signal_timed_out(&self) {
        self.fire_start_ack();
        match self.transition(WorkerStatus::Timeout, Some(EventKind::Timeout), None) {
            Ok(()) => self.maybe_schedule_retry(EventKind::Timeout),
            Err(err) => debug!(worker = %self.id, %err, "late timeout signal dropped"),
        }
    }

    pub(crate) fn signal_cancelled(&self) {
        self.fire_start_ack();
        match self.transition(WorkerStatus::Cancelled, Some(EventKind::Cancel), None) {
            Ok(()) => self.fire_cancel_ack(),
            Err(err) => debug!(worker = %self.id, %err, "late cancelled signal dropped"),
        }
    }

    /// After an error/timeout transition: consume one retry if the
    /// policy allows, then re-enter the pending queue after the
    /// configured delay.
    fn maybe_schedule_retry(&self, cause: EventKind) {
        let due = {
            let mut state = self.state.lock();
            let allowed = match cause {
                EventKind::Error => self.options.retry_policy.retry_on_error,
                EventKind::Timeout => self.options.retry_policy.retry_on_timeout,
                _ => false,
            };
            if allowed && state.retries_remaining > 0 {
                state.retries_remaining -= 1;
                Some(self.snapshot(EventKind::Retry, &state))
            } else {
                None
            }
        };
        let Some(base) = due else { return };

        debug!(worker = %self.id, "retry scheduled");
        self.emit_as(EventKind::Retry, &base);

        let delay = self.options.retry_policy.retry_after();
        let weak = self.weak_self.clone();
        self.spawner.spawn(Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(shared) = weak.upgrade() {
                if let Err(err) = shared.transition(WorkerStatus::Pending, None, None) {
                    debug!(%err, "retry re-queue skipped");
                }
            }
        }));
    }
}

/// Handle to one scheduled job's lifecycle.
///
/// Cloning is cheap; all clones observe and drive the same state
/// machine.
#[derive(Clone)]
pub struct Worker {
    shared: Arc<WorkerShared>,
}

impl Worker {
    pub(crate) fn new(
        id: WorkerId,
        job: Arc<dyn Job>,
        options: WorkerOptions,
        spawner: Arc<dyn Spawn>,
    ) -> Self {
        let now = clock::now_ms();
        let shared = Arc::new_cyclic(|weak| WorkerShared {
            id,
            job,
            state: Mutex::new(WorkerState {
                status: WorkerStatus::Initialed,
                prev_status: None,
                progress: 0.0,
                retries_remaining: options.retries,
                last_error: None,
                created_at_ms: now,
                updated_at_ms: now,
                run_started_at: None,
                handle_in_flight: false,
            }),
            options,
            events: Channel::new(),
            start_ack: Mutex::new(None),
            cancel_ack: Mutex::new(None),
            spawner,
            weak_self: weak.clone(),
        });
        Self { shared }
    }

    /// This worker's id.
    #[must_use]
    pub fn id(&self) -> WorkerId {
        self.shared.id
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        self.shared.state.lock().status
    }

    /// Status immediately before the current one; `None` before the
    /// first transition.
    #[must_use]
    pub fn prev_status(&self) -> Option<WorkerStatus> {
        self.shared.state.lock().prev_status
    }

    /// Current progress in `[0, 1]`.
    #[must_use]
    pub fn progress(&self) -> f64 {
        self.shared.state.lock().progress
    }

    /// Remaining automatic retries.
    #[must_use]
    pub fn retries_remaining(&self) -> u32 {
        self.shared.state.lock().retries_remaining
    }

    /// Detail of the most recent job failure, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.shared.state.lock().last_error.clone()
    }

    /// Creation timestamp, epoch milliseconds.
    #[must_use]
    pub fn created_at_ms(&self) -> u128 {
        self.shared.state.lock().created_at_ms
    }

    /// Timestamp of the last observable change, epoch milliseconds.
    #[must_use]
    pub fn updated_at_ms(&self) -> u128 {
        self.shared.state.lock().updated_at_ms
    }

    /// Total work units reported by the job.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.shared.job.size()
    }

    /// Estimated throughput in work units per second, derived from
    /// progress and elapsed running time. Informational only.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn speed(&self) -> f64 {
        let state = self.shared.state.lock();
        let Some(started) = state.run_started_at else {
            return 0.0;
        };
        let elapsed = started.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        (self.shared.job.size() as f64 * state.progress) / elapsed
    }

    /// Estimated seconds until completion, if a speed estimate exists.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn eta_secs(&self) -> Option<f64> {
        let speed = self.speed();
        if speed <= 0.0 {
            return None;
        }
        let progress = self.progress();
        Some((self.shared.job.size() as f64 * (1.0 - progress)) / speed)
    }

    /// Subscribe to one event kind. Handlers run synchronously, in
    /// subscription order, on the emitting thread.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&WorkerEvent) + Send + Sync + 'static,
    {
        self.shared.events.on(kind, handler)
    }

    /// Subscribe to every event from this worker.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&WorkerEvent) + Send + Sync + 'static,
    {
        self.shared.events.on_any(handler)
    }

    /// Remove a subscription.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.shared.events.off(id)
    }

    /// Broadcast one or more notifications carrying this worker's
    /// current snapshot, with optional error detail.
    ///
    /// Meant for informational kinds; `update:status` is produced by
    /// the state machine itself and carries bookkeeping weight, so
    /// emitting it by hand is rarely what you want.
    pub fn emit(&self, kinds: &[EventKind], error: Option<String>) {
        let base = {
            let state = self.shared.state.lock();
            let mut base = self.shared.snapshot(EventKind::Update, &state);
            base.error = error;
            base
        };
        for &kind in kinds {
            self.shared.emit_as(kind, &base);
        }
    }

    /// Queue this worker for admission.
    ///
    /// Idempotent no-op while the worker is already pending or
    /// running. Progress resets to zero unless the worker comes from
    /// `Paused`.
    ///
    /// # Errors
    ///
    /// Currently infallible for every reachable status; the `Result`
    /// shape matches the other lifecycle operations.
    pub fn pending(&self) -> Result<(), SchedulerError> {
        if self.status().is_active() {
            return Ok(());
        }
        self.shared.transition(WorkerStatus::Pending, None, None)
    }

    /// Start the job: transition to running, spawn `Job::handle`, and
    /// wait for the job's `started` acknowledgment.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the worker is not pending. `AckTimeout` if
    /// the job does not acknowledge within the deadline; the worker is
    /// then moved to `Error` so the slot frees and the retry budget
    /// applies.
    pub(crate) async fn run(&self) -> Result<(), SchedulerError> {
        let shared = &self.shared;

        // A worker resumed after a pause still has its job in flight
        // (pause never halts the payload); reattach the slot without
        // spawning a second handle invocation.
        if shared.state.lock().handle_in_flight {
            return shared.transition(WorkerStatus::Running, Some(EventKind::Run), None);
        }

        let (tx, rx) = oneshot::channel();
        *shared.start_ack.lock() = Some(tx);

        if let Err(err) = shared.transition(WorkerStatus::Running, Some(EventKind::Run), None) {
            shared.start_ack.lock().take();
            return Err(err);
        }
        shared.state.lock().handle_in_flight = true;

        let job = Arc::clone(&shared.job);
        let signals = JobSignals::new(shared.weak_self.clone());
        shared.spawner.spawn(Box::pin(async move {
            job.handle(signals).await;
        }));

        let deadline = shared.options.ack_timeout;
        match tokio::time::timeout(deadline, rx).await {
            // Started, or a terminal signal raced the acknowledgment;
            // either way the state machine has taken over.
            Ok(_) => Ok(()),
            Err(_) => {
                shared.start_ack.lock().take();
                warn!(worker = %shared.id, ?deadline, "job never acknowledged start");
                let detail = format!("job did not acknowledge start within {deadline:?}");
                if shared
                    .transition(WorkerStatus::Error, Some(EventKind::Error), Some(detail))
                    .is_ok()
                {
                    shared.maybe_schedule_retry(EventKind::Error);
                }
                Err(SchedulerError::AckTimeout {
                    op: "run",
                    timeout: deadline,
                })
            }
        }
    }

    /// Cancel this worker.
    ///
    /// A pending worker is cancelled immediately (its job never
    /// started). A running worker's job is asked to abort and must
    /// acknowledge within the deadline. Any other status is a lenient
    /// no-op.
    ///
    /// # Errors
    ///
    /// `AckTimeout` if a running job does not acknowledge the abort in
    /// time; the worker's status is left unchanged.
    pub async fn cancel(&self) -> Result<(), SchedulerError> {
        match self.status() {
            WorkerStatus::Pending => {
                if let Err(err) =
                    self.shared
                        .transition(WorkerStatus::Cancelled, Some(EventKind::Cancel), None)
                {
                    // Lost a race with admission or another control
                    // call; cancel stays lenient.
                    debug!(worker = %self.id(), %err, "cancel raced a transition");
                }
                Ok(())
            }
            WorkerStatus::Running => {
                let (tx, rx) = oneshot::channel();
                *self.shared.cancel_ack.lock() = Some(tx);
                self.shared.job.abort().await;

                let deadline = self.shared.options.ack_timeout;
                match tokio::time::timeout(deadline, rx).await {
                    Ok(_) => Ok(()),
                    Err(_) => {
                        self.shared.cancel_ack.lock().take();
                        warn!(worker = %self.id(), ?deadline, "abort never acknowledged");
                        Err(SchedulerError::AckTimeout {
                            op: "cancel",
                            timeout: deadline,
                        })
                    }
                }
            }
            status => {
                debug!(worker = %self.id(), %status, "cancel is a no-op here");
                Ok(())
            }
        }
    }

    /// Pause a pending or running worker.
    ///
    /// Bookkeeping only: the concurrency slot is released but the job
    /// is not suspended. A terminal signal from the still-working job
    /// is applied even while paused.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the worker is pending or running.
    pub fn pause(&self) -> Result<(), SchedulerError> {
        let status = self.status();
        if !status.is_active() {
            return Err(SchedulerError::InvalidState {
                id: self.id(),
                status,
            });
        }
        self.shared
            .transition(WorkerStatus::Paused, Some(EventKind::Pause), None)
    }

    /// Re-queue a paused worker for admission.
    ///
    /// The worker re-enters the pending queue rather than jumping
    /// straight back to running, so the concurrency ceiling holds.
    /// Progress is preserved across the round trip.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the worker is paused.
    pub fn resume(&self) -> Result<(), SchedulerError> {
        let status = self.status();
        if status != WorkerStatus::Paused {
            return Err(SchedulerError::InvalidState {
                id: self.id(),
                status,
            });
        }
        self.shared
            .transition(WorkerStatus::Pending, Some(EventKind::Resume), None)
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Worker")
            .field("id", &self.shared.id)
            .field("status", &state.status)
            .field("progress", &state.progress)
            .field("retries_remaining", &state.retries_remaining)
            .finish_non_exhaustive()
    }
}
