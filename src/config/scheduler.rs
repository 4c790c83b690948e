//! Scheduler configuration structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::worker::{RetryPolicy, WorkerOptions};
use crate::core::{SchedulerError, SchedulerOptions};

/// Default retry settings applied to workers created without explicit
/// options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Automatic retry budget per worker.
    pub retries: u32,
    /// Delay before a failed worker re-enters the pending queue.
    pub retry_after_ms: u64,
    /// Retry after the job reports a failure.
    pub retry_on_error: bool,
    /// Retry after the job reports its own timeout.
    pub retry_on_timeout: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 0,
            retry_after_ms: 1_000,
            retry_on_error: true,
            retry_on_timeout: true,
        }
    }
}

/// Root scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Target maximum simultaneously running workers.
    pub concurrency: usize,
    /// Idle polling interval of the admission cycles, in milliseconds.
    /// Kept configurable so tests can run with a short heartbeat.
    pub heartbeat_ms: u64,
    /// Deadline for jobs to acknowledge start/cancel, in milliseconds.
    pub ack_timeout_ms: u64,
    /// Registry capacity; `None` means unbounded.
    pub capacity: Option<usize>,
    /// Default retry behavior for created workers.
    pub retry: RetryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get().max(1),
            heartbeat_ms: 50,
            ack_timeout_ms: 3_000,
            capacity: None,
            retry: RetryConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` naming the offending field.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.concurrency == 0 {
            return Err(SchedulerError::InvalidConfig(
                "concurrency must be greater than 0".into(),
            ));
        }
        if self.heartbeat_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "heartbeat_ms must be greater than 0".into(),
            ));
        }
        if self.ack_timeout_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "ack_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.capacity == Some(0) {
            return Err(SchedulerError::InvalidConfig(
                "capacity must be greater than 0 when set".into(),
            ));
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, SchedulerError> {
        let cfg: Self = serde_json::from_str(input)
            .map_err(|e| SchedulerError::InvalidConfig(format!("parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Lower this configuration into scheduler construction options.
    #[must_use]
    pub fn to_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            concurrency: self.concurrency,
            heartbeat: Duration::from_millis(self.heartbeat_ms),
            capacity: self.capacity,
            default_worker_options: WorkerOptions {
                retries: self.retry.retries,
                retry_policy: RetryPolicy {
                    retry_after_ms: self.retry.retry_after_ms,
                    retry_on_error: self.retry.retry_on_error,
                    retry_on_timeout: self.retry.retry_on_timeout,
                },
                ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        SchedulerConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_values_are_rejected() {
        let cfg = SchedulerConfig {
            concurrency: 0,
            ..SchedulerConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = SchedulerConfig {
            heartbeat_ms: 0,
            ..SchedulerConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = SchedulerConfig {
            ack_timeout_ms: 0,
            ..SchedulerConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = SchedulerConfig {
            capacity: Some(0),
            ..SchedulerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_json_with_defaults_filled_in() {
        let cfg =
            SchedulerConfig::from_json_str(r#"{"concurrency": 4, "heartbeat_ms": 10}"#).unwrap();
        assert_eq!(cfg.concurrency, 4);
        assert_eq!(cfg.heartbeat_ms, 10);
        assert_eq!(cfg.ack_timeout_ms, 3_000);
        assert_eq!(cfg.capacity, None);
    }

    #[test]
    fn rejects_invalid_json_values() {
        assert!(SchedulerConfig::from_json_str(r#"{"concurrency": 0}"#).is_err());
        assert!(SchedulerConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn lowers_into_options() {
        let cfg = SchedulerConfig {
            concurrency: 3,
            heartbeat_ms: 20,
            ack_timeout_ms: 500,
            capacity: Some(16),
            retry: RetryConfig {
                retries: 2,
                retry_after_ms: 0,
                retry_on_error: true,
                retry_on_timeout: false,
            },
        };
        let options = cfg.to_options();
        assert_eq!(options.concurrency, 3);
        assert_eq!(options.heartbeat, Duration::from_millis(20));
        assert_eq!(options.capacity, Some(16));
        assert_eq!(options.default_worker_options.retries, 2);
        assert!(!options.default_worker_options.retry_policy.retry_on_timeout);
        assert_eq!(
            options.default_worker_options.ack_timeout,
            Duration::from_millis(500)
        );
    }
}
