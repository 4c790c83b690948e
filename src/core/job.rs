//! The job capability contract and its signalling surface.
//!
//! The scheduler core is agnostic to what work a job performs. It
//! consumes exactly three capabilities — [`Job::size`],
//! [`Job::handle`], [`Job::abort`] — and in return hands the job a
//! narrow [`JobSignals`] callback surface through which the job
//! reports its lifecycle back to the owning worker.

use std::sync::Weak;

use async_trait::async_trait;

use crate::core::worker::WorkerShared;

/// A unit of work delegated to by a worker.
///
/// Implementations define what "running" actually does: a network
/// transfer, a checksum computation, any long asynchronous operation.
///
/// # Contract
///
/// `handle` must eventually report exactly one terminal signal
/// (`complete`, `error`, `timed_out`, or `cancelled`) through the
/// provided [`JobSignals`]; `started` should be reported promptly,
/// because the worker bounds the wait for it with an acknowledgment
/// deadline. `abort` requests in-flight cancellation and, if accepted,
/// must eventually cause the `cancelled` signal.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use workyard::core::{Job, JobSignals};
///
/// struct ChecksumJob {
///     bytes: Vec<u8>,
/// }
///
/// #[async_trait]
/// impl Job for ChecksumJob {
///     fn size(&self) -> u64 {
///         self.bytes.len() as u64
///     }
///
///     async fn handle(&self, signals: JobSignals) {
///         signals.started();
///         // ... chunked work, reporting signals.progress(..) ...
///         signals.complete();
///     }
///
///     async fn abort(&self) {
///         // flag the work loop; it reports signals.cancelled()
///     }
/// }
/// ```
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Total units of work, used for speed and ETA estimation only.
    fn size(&self) -> u64;

    /// Begin execution, reporting lifecycle signals as they occur.
    async fn handle(&self, signals: JobSignals);

    /// Request in-flight cancellation.
    async fn abort(&self);
}

/// The narrow callback surface a job reports through.
///
/// Signals are applied synchronously to the owning worker's state
/// machine. A signal that is not legal in the worker's current status
/// (for example `complete` after the worker was cancelled) is dropped
/// with a debug log rather than panicking. Holds only a weak
/// reference: a job that outlives its worker signals into the void.
#[derive(Clone)]
pub struct JobSignals {
    worker: Weak<WorkerShared>,
}

impl JobSignals {
    pub(crate) const fn new(worker: Weak<WorkerShared>) -> Self {
        Self { worker }
    }

    /// Acknowledge that execution has begun.
    pub fn started(&self) {
        if let Some(w) = self.worker.upgrade() {
            w.signal_started();
        }
    }

    /// Report fractional progress; values are clamped to `[0, 1]`.
    pub fn progress(&self, ratio: f64) {
        if let Some(w) = self.worker.upgrade() {
            w.signal_progress(ratio);
        }
    }

    /// Report successful completion. Terminal.
    pub fn complete(&self) {
        if let Some(w) = self.worker.upgrade() {
            w.signal_complete();
        }
    }

    /// Report a failure with opaque detail. Terminal.
    pub fn error(&self, detail: impl Into<String>) {
        if let Some(w) = self.worker.upgrade() {
            w.signal_error(detail.into());
        }
    }

    /// Report that the job observed its own timeout. Terminal.
    pub fn timed_out(&self) {
        if let Some(w) = self.worker.upgrade() {
            w.signal_timed_out();
        }
    }

    /// Acknowledge a cancellation request. Terminal.
    pub fn cancelled(&self) {
        if let Some(w) = self.worker.upgrade() {
            w.signal_cancelled();
        }
    }
}

impl std::fmt::Debug for JobSignals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSignals")
            .field("worker_alive", &(self.worker.strong_count() > 0))
            .finish()
    }
}
