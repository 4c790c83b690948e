//! Error types for scheduler operations.

use std::time::Duration;

use thiserror::Error;

use crate::core::status::WorkerStatus;
use crate::core::worker::WorkerId;

/// Errors produced by scheduler components.
///
/// Structural errors (`UnknownWorker`, `InvalidState`, `AckTimeout`,
/// `NotSupported`, `SchedulerDown`, `CapacityExceeded`, `Inconsistent`)
/// are returned synchronously to the caller of the triggering
/// operation. Job failures (`Job`) are never raised to the caller of
/// `execute`; they are recorded on the worker and broadcast through
/// the `error` event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// Operation referenced a worker id not present in the registry.
    #[error("unknown worker id: {0}")]
    UnknownWorker(WorkerId),
    /// Operation forbidden in the worker's current status.
    #[error("worker {id} is {status}, operation not allowed")]
    InvalidState {
        /// Worker the operation targeted.
        id: WorkerId,
        /// Status the worker held when the operation was rejected.
        status: WorkerStatus,
    },
    /// A control operation was not acknowledged within its deadline.
    ///
    /// Distinct from the `Timeout` worker status, which represents the
    /// job's own timeout.
    #[error("{op} was not acknowledged within {timeout:?}")]
    AckTimeout {
        /// The operation that timed out (`run` or `cancel`).
        op: &'static str,
        /// The acknowledgment deadline that expired.
        timeout: Duration,
    },
    /// Opaque failure surfaced from a job's `handle()`.
    #[error("job failed: {0}")]
    Job(String),
    /// The operation is explicitly out of scope for this scheduler.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),
    /// `execute` was called while the scheduler is shut down.
    #[error("scheduler is not up")]
    SchedulerDown,
    /// Registry is at its configured capacity.
    #[error("registry at capacity ({0})")]
    CapacityExceeded(usize),
    /// Internal bookkeeping disagrees with a worker's status.
    ///
    /// An invariant violation, not a user error.
    #[error("scheduler bookkeeping inconsistent for worker {0}")]
    Inconsistent(WorkerId),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_terse() {
        let err = SchedulerError::UnknownWorker(WorkerId(7));
        assert_eq!(err.to_string(), "unknown worker id: 7");

        let err = SchedulerError::InvalidState {
            id: WorkerId(3),
            status: WorkerStatus::Running,
        };
        assert_eq!(err.to_string(), "worker 3 is running, operation not allowed");

        let err = SchedulerError::AckTimeout {
            op: "cancel",
            timeout: Duration::from_secs(3),
        };
        assert!(err.to_string().starts_with("cancel was not acknowledged"));

        let err = SchedulerError::NotSupported("export");
        assert_eq!(err.to_string(), "operation not supported: export");
    }
}
