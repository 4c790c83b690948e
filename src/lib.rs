//! # Workyard
//!
//! A bounded-concurrency job scheduler with explicit per-job
//! lifecycle tracking, retry budgets, cancellation, and pause/resume.
//!
//! Workyard schedules many independent asynchronous jobs under a
//! concurrency ceiling. Each submitted job is wrapped in a `Worker`
//! state machine; a `Registry` owns the live workers; the `Scheduler`
//! enforces the ceiling and drains a FIFO pending queue through
//! cooperative admission cycles.
//!
//! ## Core Guarantees
//!
//! - **Bounded concurrency**: at every quiescent point, the number of
//!   running workers never exceeds the configured ceiling.
//! - **FIFO admission**: pending workers start in the order they were
//!   queued; there is no priority mechanism.
//! - **At-most-once running**: a worker holds at most one concurrency
//!   slot, and its status moves only through the legal transition
//!   table.
//! - **Retry budget**: failed or timed-out jobs re-enter the queue
//!   automatically until their budget is exhausted, then stay put for
//!   the caller to observe.
//!
//! ## Job Contract
//!
//! The scheduler is agnostic to what a job does. Implement [`core::Job`]
//! and report lifecycle signals through the provided
//! [`core::JobSignals`]:
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use workyard::core::{Job, JobSignals};
//!
//! struct TransferJob { bytes: u64 }
//!
//! #[async_trait]
//! impl Job for TransferJob {
//!     fn size(&self) -> u64 { self.bytes }
//!
//!     async fn handle(&self, signals: JobSignals) {
//!         signals.started();
//!         // ... move bytes, calling signals.progress(ratio) ...
//!         signals.complete();
//!     }
//!
//!     async fn abort(&self) {
//!         // flag the transfer loop; it reports signals.cancelled()
//!     }
//! }
//! ```
//!
//! ## Driving the Scheduler
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use workyard::builders::SchedulerBuilder;
//!
//! let scheduler = SchedulerBuilder::new().concurrency(2).build()?;
//! scheduler.startup();
//!
//! let worker = scheduler.create(Arc::new(TransferJob { bytes: 1 << 20 }))?;
//! scheduler.execute(worker.id())?;
//!
//! // Observe outcomes by subscribing, not by catching:
//! scheduler.on(workyard::core::EventKind::Finish, |ev| {
//!     println!("worker {} finished as {}", ev.worker.id(), ev.worker.status());
//! });
//! ```
//!
//! Cancellation is cooperative: `cancel` asks the job to abort and
//! bounds the wait for its acknowledgment. Pause is bookkeeping-only:
//! the slot is released, the job is not suspended. Resume re-queues
//! the worker through admission so the ceiling holds.
//!
//! For complete scenarios, see `tests/scheduler_admission_test.rs`.

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling: worker state machine, registry, and admission.
pub mod core;
/// Configuration models for the scheduler and its retry defaults.
pub mod config;
/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Runtime adapters: the spawn abstraction and its tokio implementation.
pub mod runtime;
/// Shared utilities.
pub mod util;
