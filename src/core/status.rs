//! Worker lifecycle statuses and the legal transition table.

use serde::{Deserialize, Serialize};

/// Status of a worker in the scheduler lifecycle.
///
/// `Initialed` is the creation state; `Pending` workers sit in the
/// admission queue; `Running` workers hold a concurrency slot;
/// `Complete`, `Error`, `Timeout`, and `Cancelled` are terminal;
/// `Paused` suspends bookkeeping without a payload-level halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Worker was created and has not been scheduled yet.
    Initialed,
    /// Worker is waiting in the admission queue.
    Pending,
    /// Worker holds a concurrency slot and its job is executing.
    Running,
    /// Job finished successfully.
    Complete,
    /// Job reported a failure.
    Error,
    /// Job reported its own timeout.
    Timeout,
    /// Worker was cancelled.
    Cancelled,
    /// Worker is paused; the slot is released, the job is not halted.
    Paused,
}

impl WorkerStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Complete | Self::Error | Self::Timeout | Self::Cancelled
        )
    }

    /// Whether the worker occupies scheduler queues (pending or running).
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Whether a transition from `self` to `target` is legal.
    ///
    /// Every status pair is decided here; unlisted pairs are rejected
    /// rather than silently ignored. Terminal statuses may re-enter
    /// `Pending` (manual re-execution after a failure or retry
    /// exhaustion). `Paused` may reach a terminal status directly
    /// because pausing does not halt the underlying job.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        use WorkerStatus::{
            Cancelled, Complete, Error, Initialed, Paused, Pending, Running, Timeout,
        };

        matches!(
            (self, target),
            // From Initialed
            (Initialed, Pending) | (Initialed, Cancelled) |
            // From Pending
            (Pending, Running) | (Pending, Cancelled) | (Pending, Paused) |
            // From Running
            (Running, Complete) | (Running, Error) | (Running, Timeout) |
            (Running, Cancelled) | (Running, Paused) |
            // From Paused: re-admission, or a late outcome from the
            // never-halted job
            (Paused, Pending) | (Paused, Complete) | (Paused, Error) |
            (Paused, Timeout) | (Paused, Cancelled) |
            // Terminal statuses may be re-queued manually
            (Complete, Pending) | (Error, Pending) |
            (Timeout, Pending) | (Cancelled, Pending)
        )
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initialed => "initialed",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Paused => "paused",
        };
        write!(f, "{s}")
    }
}
