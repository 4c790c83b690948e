//! Registry: the id-indexed store of live workers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::core::job::Job;
use crate::core::worker::{Worker, WorkerId, WorkerOptions};
use crate::core::SchedulerError;
use crate::runtime::Spawn;

/// Source of worker ids, injected so tests and embedders can control
/// id assignment. Ids must never repeat within one registry.
pub trait IdGenerator: Send + Sync + 'static {
    /// Produce the next unique id.
    fn next_id(&self) -> WorkerId;
}

/// Default id source: a per-registry monotonic counter starting at 1.
#[derive(Debug, Default)]
pub struct MonotonicIds {
    counter: AtomicU64,
}

impl IdGenerator for MonotonicIds {
    fn next_id(&self) -> WorkerId {
        WorkerId(self.counter.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Id-indexed store of live workers.
///
/// A worker lives in exactly one registry; removal is the only path to
/// destruction. The registry itself is lenient — state-dependent
/// removal rules (no removal while pending/running) belong to the
/// scheduler. Capacity, when configured, is enforced: creation past it
/// fails with [`SchedulerError::CapacityExceeded`].
pub struct Registry {
    workers: Mutex<BTreeMap<WorkerId, Worker>>,
    ids: Arc<dyn IdGenerator>,
    capacity: Option<usize>,
    spawner: Arc<dyn Spawn>,
}

impl Registry {
    /// Create a registry with the given capacity (`None` = unbounded),
    /// id source, and spawner handed to each created worker.
    #[must_use]
    pub fn new(
        capacity: Option<usize>,
        ids: Arc<dyn IdGenerator>,
        spawner: Arc<dyn Spawn>,
    ) -> Self {
        Self {
            workers: Mutex::new(BTreeMap::new()),
            ids,
            capacity,
            spawner,
        }
    }

    /// Construct and store a new worker wrapping `job`.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` if the registry is full.
    pub fn create(
        &self,
        job: Arc<dyn Job>,
        options: WorkerOptions,
    ) -> Result<Worker, SchedulerError> {
        let mut workers = self.workers.lock();
        if let Some(cap) = self.capacity {
            if workers.len() >= cap {
                return Err(SchedulerError::CapacityExceeded(cap));
            }
        }
        let id = self.ids.next_id();
        let worker = Worker::new(id, job, options, Arc::clone(&self.spawner));
        workers.insert(id, worker.clone());
        debug!(worker = %id, total = workers.len(), "worker created");
        Ok(worker)
    }

    /// Look up a worker by id.
    ///
    /// # Errors
    ///
    /// `UnknownWorker` if the id is not present.
    pub fn get(&self, id: WorkerId) -> Result<Worker, SchedulerError> {
        self.workers
            .lock()
            .get(&id)
            .cloned()
            .ok_or(SchedulerError::UnknownWorker(id))
    }

    /// Remove a worker. Removing an unknown id is a no-op.
    pub fn remove(&self, id: WorkerId) {
        if self.workers.lock().remove(&id).is_some() {
            debug!(worker = %id, "worker removed");
        }
    }

    /// Remove every worker.
    pub fn clear(&self) {
        let mut workers = self.workers.lock();
        let n = workers.len();
        workers.clear();
        debug!(removed = n, "registry cleared");
    }

    /// Apply `f` to a snapshot of every stored worker, in ascending id
    /// order. The snapshot is stable even if `f` mutates the registry.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Worker),
    {
        for worker in self.snapshot() {
            f(&worker);
        }
    }

    /// Snapshot of all workers in ascending id order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Worker> {
        self.workers.lock().values().cloned().collect()
    }

    /// Number of stored workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.lock().is_empty()
    }

    /// The configured capacity, if any.
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::JobSignals;
    use crate::runtime::TokioSpawner;
    use async_trait::async_trait;

    struct NoopJob;

    #[async_trait]
    impl Job for NoopJob {
        fn size(&self) -> u64 {
            0
        }
        async fn handle(&self, signals: JobSignals) {
            signals.started();
            signals.complete();
        }
        async fn abort(&self) {}
    }

    fn make_registry(capacity: Option<usize>) -> Registry {
        Registry::new(
            capacity,
            Arc::new(MonotonicIds::default()),
            Arc::new(TokioSpawner::current().unwrap()),
        )
    }

    #[tokio::test]
    async fn ids_are_unique_and_monotonic() {
        let registry = make_registry(None);
        let a = registry
            .create(Arc::new(NoopJob), WorkerOptions::default())
            .unwrap();
        let b = registry
            .create(Arc::new(NoopJob), WorkerOptions::default())
            .unwrap();
        assert!(b.id() > a.id());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn get_unknown_id_errors() {
        let registry = make_registry(None);
        let err = registry.get(WorkerId(99)).unwrap_err();
        assert_eq!(err, SchedulerError::UnknownWorker(WorkerId(99)));
    }

    #[tokio::test]
    async fn remove_is_lenient() {
        let registry = make_registry(None);
        let worker = registry
            .create(Arc::new(NoopJob), WorkerOptions::default())
            .unwrap();
        registry.remove(worker.id());
        assert!(registry.is_empty());
        // Deleting a non-existent key is a no-op.
        registry.remove(worker.id());
        registry.remove(WorkerId(1234));
    }

    #[tokio::test]
    async fn ids_are_never_reused_after_removal() {
        let registry = make_registry(None);
        let a = registry
            .create(Arc::new(NoopJob), WorkerOptions::default())
            .unwrap();
        registry.remove(a.id());
        let b = registry
            .create(Arc::new(NoopJob), WorkerOptions::default())
            .unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn capacity_is_enforced_deterministically() {
        let registry = make_registry(Some(2));
        registry
            .create(Arc::new(NoopJob), WorkerOptions::default())
            .unwrap();
        registry
            .create(Arc::new(NoopJob), WorkerOptions::default())
            .unwrap();
        let err = registry
            .create(Arc::new(NoopJob), WorkerOptions::default())
            .unwrap_err();
        assert_eq!(err, SchedulerError::CapacityExceeded(2));

        // Removal frees a slot.
        let first = registry.snapshot()[0].id();
        registry.remove(first);
        assert!(registry
            .create(Arc::new(NoopJob), WorkerOptions::default())
            .is_ok());
    }

    #[tokio::test]
    async fn for_each_visits_in_id_order() {
        let registry = make_registry(None);
        for _ in 0..5 {
            registry
                .create(Arc::new(NoopJob), WorkerOptions::default())
                .unwrap();
        }
        let mut seen = Vec::new();
        registry.for_each(|w| seen.push(w.id()));
        let mut sorted = seen.clone();
        sorted.sort_unstable();
        assert_eq!(seen, sorted);
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let registry = make_registry(None);
        for _ in 0..3 {
            registry
                .create(Arc::new(NoopJob), WorkerOptions::default())
                .unwrap();
        }
        registry.clear();
        assert!(registry.is_empty());
    }
}
