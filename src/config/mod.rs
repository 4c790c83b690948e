//! Configuration models for the scheduler and its retry defaults.

pub mod scheduler;

pub use scheduler::{RetryConfig, SchedulerConfig};
