//! Per-entity publish/subscribe channel for lifecycle notifications.
//!
//! Both `Worker` and `Scheduler` own a [`Channel`]. Handlers are
//! delivered synchronously, in subscription order, on the thread that
//! emits. Unsubscription is explicit via the [`SubscriptionId`]
//! returned from `on`/`on_any`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Named lifecycle notifications emitted by workers and relayed by the
/// scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Worker entered the running status.
    Run,
    /// The job reported a progress update.
    Progress,
    /// The job finished successfully.
    Complete,
    /// The job reported a failure.
    Error,
    /// The worker was cancelled.
    Cancel,
    /// The job reported its own timeout.
    Timeout,
    /// The worker was paused.
    Pause,
    /// A paused worker was re-queued for admission.
    Resume,
    /// Any observable change (status, progress) occurred.
    Update,
    /// The worker's status changed; carries both sides of the change.
    UpdateStatus,
    /// The worker entered a terminal status.
    Finish,
    /// An automatic retry was scheduled.
    Retry,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Run => "run",
            Self::Progress => "progress",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancel => "cancel",
            Self::Timeout => "timeout",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Update => "update",
            Self::UpdateStatus => "update:status",
            Self::Finish => "finish",
            Self::Retry => "retry",
        };
        write!(f, "{s}")
    }
}

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type HandlerFn<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Subscriber<E> {
    id: u64,
    filter: Option<EventKind>,
    handler: HandlerFn<E>,
}

/// A typed event channel with explicit subscribe/unsubscribe.
///
/// Emission snapshots the matching handlers under a brief lock, then
/// invokes them with the lock released, so a handler may subscribe,
/// unsubscribe, or emit without deadlocking. Handlers added while an
/// emission is in flight see only subsequent events.
pub struct Channel<E> {
    subscribers: Mutex<Vec<Subscriber<E>>>,
    next_id: AtomicU64,
}

impl<E> Channel<E> {
    /// Create an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe a handler to a single event kind.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe(Some(kind), Arc::new(handler))
    }

    /// Subscribe a handler to every event on this channel.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe(None, Arc::new(handler))
    }

    fn subscribe(&self, filter: Option<EventKind>, handler: HandlerFn<E>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push(Subscriber {
            id,
            filter,
            handler,
        });
        SubscriptionId(id)
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.lock();
        let before = subs.len();
        subs.retain(|s| s.id != id.0);
        subs.len() != before
    }

    /// Deliver `payload` to every handler subscribed to `kind` (or to
    /// all events), in subscription order.
    pub fn emit(&self, kind: EventKind, payload: &E) {
        let matching: Vec<HandlerFn<E>> = {
            let subs = self.subscribers.lock();
            subs.iter()
                .filter(|s| s.filter.is_none() || s.filter == Some(kind))
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };
        for handler in matching {
            handler(payload);
        }
    }

    /// Deliver `payload` under several kinds in sequence.
    pub fn emit_many(&self, kinds: &[EventKind], payload: &E) {
        for &kind in kinds {
            self.emit(kind, payload);
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<E> Default for Channel<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Channel<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
