//! Scheduler: concurrency policy, admission loop, and the control API
//! over the worker registry.
//!
//! The scheduler enforces `running <= concurrency` at every quiescent
//! point and admits pending workers in FIFO order as capacity frees
//! up. One cooperative admission cycle runs per unit of concurrency;
//! each cycle pops the oldest pending worker when slack exists, starts
//! it, and re-arms when that worker leaves the running status. Cycles
//! self-throttle on a fixed-interval heartbeat while idle.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::core::events::{Channel, EventKind, SubscriptionId};
use crate::core::job::Job;
use crate::core::registry::{IdGenerator, MonotonicIds, Registry};
use crate::core::status::WorkerStatus;
use crate::core::worker::{Worker, WorkerEvent, WorkerId, WorkerOptions};
use crate::core::SchedulerError;
use crate::runtime::Spawn;

/// Scheduler construction options.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Target maximum simultaneously running workers.
    pub concurrency: usize,
    /// Idle polling interval of the admission cycles.
    pub heartbeat: Duration,
    /// Registry capacity (`None` = unbounded).
    pub capacity: Option<usize>,
    /// Options applied to workers created without explicit options.
    pub default_worker_options: WorkerOptions,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get().max(1),
            heartbeat: Duration::from_millis(50),
            capacity: None,
            default_worker_options: WorkerOptions::default(),
        }
    }
}

/// Payload delivered to scheduler-level event subscribers: the worker
/// event, tagged with the originating worker and a snapshot of all
/// registered workers.
#[derive(Debug, Clone)]
pub struct SchedulerEvent {
    /// The notification this payload was delivered under.
    pub kind: EventKind,
    /// Error detail for `error` notifications.
    pub error: Option<String>,
    /// The worker the event originated from.
    pub worker: Worker,
    /// Snapshot of every registered worker at emission time.
    pub workers: Vec<Worker>,
}

/// Per-worker outcome of a bulk operation.
///
/// Bulk operations attempt every worker; one failure never aborts the
/// sweep.
#[derive(Debug)]
pub struct BulkOutcome {
    /// The worker the operation was applied to.
    pub id: WorkerId,
    /// That worker's individual outcome.
    pub result: Result<(), SchedulerError>,
}

/// Point-in-time utilization snapshot.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Configured concurrency ceiling.
    pub concurrency: usize,
    /// Workers currently running.
    pub running: usize,
    /// Workers waiting in the admission queue.
    pub pending: usize,
    /// Total registered workers.
    pub workers: usize,
    /// Whether the admission loop is live.
    pub is_up: bool,
}

struct Inner {
    concurrency: usize,
    /// Count of workers in the running status. Must equal
    /// `running_ids.len()` at every quiescent point.
    running: usize,
    /// Slots held by admissions popped from the queue but not yet
    /// transitioned to running; keeps concurrent cycles from
    /// over-admitting in that window.
    reserved: usize,
    /// Live admission cycles.
    cycles: usize,
    is_up: bool,
    /// Generation tag; cycles from an older epoch exit on wake.
    epoch: u64,
    pending: VecDeque<WorkerId>,
    running_ids: VecDeque<WorkerId>,
    /// Ids of workers in any status other than pending/running.
    buckets: HashMap<WorkerStatus, BTreeSet<WorkerId>>,
}

impl Inner {
    fn detach(&mut self, id: WorkerId, status: WorkerStatus) {
        match status {
            WorkerStatus::Pending => self.pending.retain(|p| *p != id),
            WorkerStatus::Running => {
                self.running_ids.retain(|r| *r != id);
                self.running = self.running.saturating_sub(1);
            }
            other => {
                if let Some(bucket) = self.buckets.get_mut(&other) {
                    bucket.remove(&id);
                }
            }
        }
    }

    fn attach(&mut self, id: WorkerId, status: WorkerStatus) {
        match status {
            WorkerStatus::Pending => self.pending.push_back(id),
            WorkerStatus::Running => {
                self.running_ids.push_back(id);
                self.running += 1;
                self.reserved = self.reserved.saturating_sub(1);
            }
            other => {
                self.buckets.entry(other).or_default().insert(id);
            }
        }
    }

    const fn in_flight(&self) -> usize {
        self.running + self.reserved
    }

    fn release_reservation(&mut self) {
        self.reserved = self.reserved.saturating_sub(1);
    }
}

struct Shared {
    registry: Registry,
    inner: Mutex<Inner>,
    events: Channel<SchedulerEvent>,
    spawner: Arc<dyn Spawn>,
    heartbeat: Duration,
    default_worker_options: WorkerOptions,
}

enum Step {
    Quit,
    Retire,
    Tick,
    Admit(WorkerId),
}

impl Shared {
    /// Status-index and counter bookkeeping, applied as one unit under
    /// the inner mutex before any other observer sees the event, then
    /// relay to scheduler-level subscribers.
    fn on_worker_event(&self, ev: &WorkerEvent) {
        let Ok(worker) = self.registry.get(ev.id) else {
            debug!(worker = %ev.id, kind = %ev.kind, "event from unregistered worker ignored");
            return;
        };

        if ev.kind == EventKind::UpdateStatus {
            let mut inner = self.inner.lock();
            if let Some(from) = ev.prev_status {
                inner.detach(ev.id, from);
            }
            inner.attach(ev.id, ev.status);
            debug!(
                worker = %ev.id,
                running = inner.running,
                pending = inner.pending.len(),
                "indices updated"
            );
        }

        let payload = SchedulerEvent {
            kind: ev.kind,
            error: ev.error.clone(),
            worker,
            workers: self.registry.snapshot(),
        };
        self.events.emit(ev.kind, &payload);
    }

    fn install_relay(shared: &Arc<Self>, worker: &Worker) {
        let weak = Arc::downgrade(shared);
        worker.on_any(move |ev| {
            if let Some(shared) = weak.upgrade() {
                shared.on_worker_event(ev);
            }
        });
    }

    fn spawn_cycles(shared: &Arc<Self>, count: usize, epoch: u64) {
        for _ in 0..count {
            let weak = Arc::downgrade(shared);
            shared
                .spawner
                .spawn(Box::pin(Self::admission_cycle(weak, epoch)));
        }
    }

    /// One cooperative admission cycle. Runs until shutdown, an epoch
    /// change, or a concurrency decrease leaves it surplus.
    async fn admission_cycle(weak: Weak<Self>, epoch: u64) {
        loop {
            let Some(shared) = weak.upgrade() else { return };
            let heartbeat = shared.heartbeat;

            let step = {
                let mut inner = shared.inner.lock();
                if !inner.is_up || inner.epoch != epoch {
                    if inner.epoch == epoch {
                        inner.cycles = inner.cycles.saturating_sub(1);
                    }
                    Step::Quit
                } else if inner.concurrency < inner.in_flight() {
                    // Concurrency was lowered; retire without
                    // preempting already-running workers.
                    inner.cycles = inner.cycles.saturating_sub(1);
                    Step::Retire
                } else if inner.concurrency == inner.in_flight() {
                    Step::Tick
                } else if let Some(id) = inner.pending.pop_front() {
                    inner.reserved += 1;
                    Step::Admit(id)
                } else {
                    Step::Tick
                }
            };

            match step {
                Step::Quit => {
                    debug!("admission cycle stopped");
                    return;
                }
                Step::Retire => {
                    debug!("admission cycle retired after concurrency decrease");
                    return;
                }
                Step::Tick => {
                    drop(shared);
                    tokio::time::sleep(heartbeat).await;
                }
                Step::Admit(id) => Self::admit(&shared, id).await,
            }
        }
    }

    /// Start one admitted worker and wait until it releases its slot.
    async fn admit(shared: &Arc<Self>, id: WorkerId) {
        let worker = match shared.registry.get(id) {
            Ok(worker) => worker,
            Err(err) => {
                warn!(worker = %id, %err, "pending worker vanished before start");
                shared.inner.lock().release_reservation();
                return;
            }
        };

        // Re-arm signal: fires when the worker leaves running. Both
        // finish and pause release the slot.
        fn fire(tx: &Mutex<Option<oneshot::Sender<()>>>) {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(());
            }
        }
        let (tx, rx) = oneshot::channel::<()>();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let finish_sub = {
            let tx = Arc::clone(&tx);
            worker.on(EventKind::Finish, move |_| fire(&tx))
        };
        let pause_sub = {
            let tx = Arc::clone(&tx);
            worker.on(EventKind::Pause, move |_| fire(&tx))
        };

        debug!(worker = %id, "admitting");
        match worker.run().await {
            Ok(()) => {
                // Slot consumed by the running transition; wait for
                // the worker to give it back.
                let _ = rx.await;
            }
            Err(SchedulerError::AckTimeout { .. }) => {
                // The worker went running then errored; its finish
                // event already fired, so this resolves immediately.
                let _ = rx.await;
            }
            Err(err) => {
                // Never left pending-adjacent state (e.g. cancelled
                // between pop and start); the reservation is still
                // ours to release.
                debug!(worker = %id, %err, "admission skipped");
                shared.inner.lock().release_reservation();
            }
        }
        worker.off(finish_sub);
        worker.off(pause_sub);
    }
}

/// The scheduler: owns the registry, the concurrency policy, and the
/// admission loop. Cloning yields another handle to the same
/// scheduler.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a scheduler with the default monotonic id source.
    #[must_use]
    pub fn new(options: SchedulerOptions, spawner: Arc<dyn Spawn>) -> Self {
        Self::with_id_generator(options, spawner, Arc::new(MonotonicIds::default()))
    }

    /// Create a scheduler with an injected id source.
    #[must_use]
    pub fn with_id_generator(
        options: SchedulerOptions,
        spawner: Arc<dyn Spawn>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let registry = Registry::new(options.capacity, ids, Arc::clone(&spawner));
        Self {
            shared: Arc::new(Shared {
                registry,
                inner: Mutex::new(Inner {
                    concurrency: options.concurrency,
                    running: 0,
                    reserved: 0,
                    cycles: 0,
                    is_up: false,
                    epoch: 0,
                    pending: VecDeque::new(),
                    running_ids: VecDeque::new(),
                    buckets: HashMap::new(),
                }),
                events: Channel::new(),
                spawner,
                heartbeat: options.heartbeat,
                default_worker_options: options.default_worker_options,
            }),
        }
    }

    /// Start the admission loop. Idempotent.
    pub fn startup(&self) {
        let spawn_info = {
            let mut inner = self.shared.inner.lock();
            if inner.is_up {
                None
            } else {
                inner.is_up = true;
                inner.epoch += 1;
                inner.cycles = inner.concurrency;
                Some((inner.concurrency, inner.epoch))
            }
        };
        if let Some((count, epoch)) = spawn_info {
            info!(concurrency = count, "scheduler up");
            Shared::spawn_cycles(&self.shared, count, epoch);
        }
    }

    /// Stop the admission loop. Running workers continue to their
    /// natural outcome; nothing new is admitted. Idempotent.
    pub fn shutdown(&self) {
        let mut inner = self.shared.inner.lock();
        if !inner.is_up {
            return;
        }
        inner.is_up = false;
        inner.epoch += 1;
        inner.cycles = 0;
        inner.reserved = 0;
        info!("scheduler down");
    }

    /// Whether the admission loop is live.
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.shared.inner.lock().is_up
    }

    /// Register a job with default worker options.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` if the registry is full.
    pub fn create(&self, job: Arc<dyn Job>) -> Result<Worker, SchedulerError> {
        self.create_with_options(job, self.shared.default_worker_options.clone())
    }

    /// Register a job with explicit worker options.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` if the registry is full.
    pub fn create_with_options(
        &self,
        job: Arc<dyn Job>,
        options: WorkerOptions,
    ) -> Result<Worker, SchedulerError> {
        let worker = self.shared.registry.create(job, options)?;
        self.shared
            .inner
            .lock()
            .buckets
            .entry(WorkerStatus::Initialed)
            .or_default()
            .insert(worker.id());
        Shared::install_relay(&self.shared, &worker);
        Ok(worker)
    }

    /// Look up a worker by id.
    ///
    /// # Errors
    ///
    /// `UnknownWorker` if the id is not registered.
    pub fn get(&self, id: WorkerId) -> Result<Worker, SchedulerError> {
        self.shared.registry.get(id)
    }

    /// Remove a worker from the scheduler and destroy it.
    ///
    /// # Errors
    ///
    /// `UnknownWorker` for an unregistered id; `InvalidState` while
    /// the worker is pending or running; `Inconsistent` if internal
    /// bookkeeping disagrees with the worker's status (an invariant
    /// violation, not a user error).
    pub fn remove(&self, id: WorkerId) -> Result<(), SchedulerError> {
        let worker = self.shared.registry.get(id)?;
        {
            let mut inner = self.shared.inner.lock();
            let status = worker.status();
            if status.is_active() {
                return Err(SchedulerError::InvalidState { id, status });
            }
            let present = inner
                .buckets
                .get(&status)
                .is_some_and(|bucket| bucket.contains(&id));
            if !present {
                return Err(SchedulerError::Inconsistent(id));
            }
            if let Some(bucket) = inner.buckets.get_mut(&status) {
                bucket.remove(&id);
            }
        }
        self.shared.registry.remove(id);
        Ok(())
    }

    /// Queue a worker for admission. The actual start happens
    /// asynchronously once an admission cycle has capacity.
    ///
    /// # Errors
    ///
    /// `SchedulerDown` if the scheduler is not up; `UnknownWorker` for
    /// an unregistered id.
    pub fn execute(&self, id: WorkerId) -> Result<(), SchedulerError> {
        if !self.is_up() {
            return Err(SchedulerError::SchedulerDown);
        }
        self.shared.registry.get(id)?.pending()
    }

    /// Cancel a worker (see [`Worker::cancel`]).
    ///
    /// # Errors
    ///
    /// `UnknownWorker` for an unregistered id; `AckTimeout` if a
    /// running job never acknowledges the abort.
    pub async fn cancel(&self, id: WorkerId) -> Result<(), SchedulerError> {
        self.shared.registry.get(id)?.cancel().await
    }

    /// Pause a worker (see [`Worker::pause`]).
    ///
    /// # Errors
    ///
    /// `UnknownWorker` for an unregistered id; `InvalidState` unless
    /// the worker is pending or running.
    pub fn pause(&self, id: WorkerId) -> Result<(), SchedulerError> {
        self.shared.registry.get(id)?.pause()
    }

    /// Resume a paused worker back through the admission queue (see
    /// [`Worker::resume`]).
    ///
    /// # Errors
    ///
    /// `UnknownWorker` for an unregistered id; `InvalidState` unless
    /// the worker is paused.
    pub fn resume(&self, id: WorkerId) -> Result<(), SchedulerError> {
        self.shared.registry.get(id)?.resume()
    }

    /// Queue every registered worker for admission. Reports one
    /// outcome per worker; failures do not stop the sweep.
    pub fn execute_all(&self) -> Vec<BulkOutcome> {
        self.shared
            .registry
            .snapshot()
            .into_iter()
            .map(|worker| BulkOutcome {
                id: worker.id(),
                result: self.execute(worker.id()),
            })
            .collect()
    }

    /// Cancel every registered worker. Reports one outcome per worker.
    pub async fn cancel_all(&self) -> Vec<BulkOutcome> {
        let mut outcomes = Vec::new();
        for worker in self.shared.registry.snapshot() {
            outcomes.push(BulkOutcome {
                id: worker.id(),
                result: worker.cancel().await,
            });
        }
        outcomes
    }

    /// Pause every registered worker. Reports one outcome per worker.
    pub fn pause_all(&self) -> Vec<BulkOutcome> {
        self.shared
            .registry
            .snapshot()
            .into_iter()
            .map(|worker| BulkOutcome {
                id: worker.id(),
                result: worker.pause(),
            })
            .collect()
    }

    /// Change the concurrency ceiling.
    ///
    /// Increases start additional admission cycles immediately.
    /// Decreases take effect lazily: running workers are never
    /// preempted, and surplus cycles retire as they observe the new
    /// ceiling. Zero is legal and starves admission entirely.
    pub fn set_concurrency(&self, concurrency: usize) {
        let spawn_info = {
            let mut inner = self.shared.inner.lock();
            let old = inner.concurrency;
            inner.concurrency = concurrency;
            info!(from = old, to = concurrency, "concurrency changed");
            if inner.is_up && concurrency > inner.cycles {
                let add = concurrency - inner.cycles;
                inner.cycles = concurrency;
                Some((add, inner.epoch))
            } else {
                None
            }
        };
        if let Some((add, epoch)) = spawn_info {
            Shared::spawn_cycles(&self.shared, add, epoch);
        }
    }

    /// Current concurrency ceiling.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.shared.inner.lock().concurrency
    }

    /// Number of workers currently running.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.shared.inner.lock().running
    }

    /// Number of workers waiting in the admission queue.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.inner.lock().pending.len()
    }

    /// Number of registered workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Snapshot of every registered worker in ascending id order.
    #[must_use]
    pub fn workers(&self) -> Vec<Worker> {
        self.shared.registry.snapshot()
    }

    /// Point-in-time utilization snapshot.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let inner = self.shared.inner.lock();
        SchedulerStats {
            concurrency: inner.concurrency,
            running: inner.running,
            pending: inner.pending.len(),
            workers: self.shared.registry.len(),
            is_up: inner.is_up,
        }
    }

    /// Subscribe to one relayed event kind.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SchedulerEvent) + Send + Sync + 'static,
    {
        self.shared.events.on(kind, handler)
    }

    /// Subscribe to every relayed event.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SchedulerEvent) + Send + Sync + 'static,
    {
        self.shared.events.on_any(handler)
    }

    /// Remove a scheduler-level subscription.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.shared.events.off(id)
    }

    /// Broadcast notifications for a registered worker directly to
    /// scheduler-level subscribers, with optional error detail.
    ///
    /// # Errors
    ///
    /// `UnknownWorker` if the id is not registered.
    pub fn emit(
        &self,
        id: WorkerId,
        kinds: &[EventKind],
        error: Option<String>,
    ) -> Result<(), SchedulerError> {
        let worker = self.shared.registry.get(id)?;
        let workers = self.shared.registry.snapshot();
        for &kind in kinds {
            let payload = SchedulerEvent {
                kind,
                error: error.clone(),
                worker: worker.clone(),
                workers: workers.clone(),
            };
            self.shared.events.emit(kind, &payload);
        }
        Ok(())
    }

    /// Exporting scheduler state is explicitly unsupported.
    ///
    /// # Errors
    ///
    /// Always `NotSupported`.
    pub fn export(&self) -> Result<String, SchedulerError> {
        Err(SchedulerError::NotSupported("export"))
    }

    /// Importing scheduler state is explicitly unsupported.
    ///
    /// # Errors
    ///
    /// Always `NotSupported`.
    pub fn import(&self, _snapshot: &str) -> Result<(), SchedulerError> {
        Err(SchedulerError::NotSupported("import"))
    }

    /// Per-worker timeouts are explicitly unsupported.
    ///
    /// # Errors
    ///
    /// Always `NotSupported`.
    pub fn set_timeout(
        &self,
        _id: WorkerId,
        _timeout: Duration,
    ) -> Result<(), SchedulerError> {
        Err(SchedulerError::NotSupported("set_timeout"))
    }

    /// Priority scheduling is explicitly unsupported; admission is
    /// strictly FIFO.
    ///
    /// # Errors
    ///
    /// Always `NotSupported`.
    pub fn set_priority(&self, _id: WorkerId, _priority: i64) -> Result<(), SchedulerError> {
        Err(SchedulerError::NotSupported("set_priority"))
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Scheduler")
            .field("concurrency", &stats.concurrency)
            .field("running", &stats.running)
            .field("pending", &stats.pending)
            .field("workers", &stats.workers)
            .field("is_up", &stats.is_up)
            .finish()
    }
}
