//! Builder to construct a scheduler from configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::core::registry::IdGenerator;
use crate::core::{Scheduler, SchedulerError};
use crate::runtime::{Spawn, TokioSpawner};

/// Assembles a [`Scheduler`] from configuration plus optional
/// overrides for the spawner and id source.
///
/// ```rust,ignore
/// use workyard::builders::SchedulerBuilder;
///
/// let scheduler = SchedulerBuilder::new()
///     .concurrency(4)
///     .heartbeat(Duration::from_millis(10))
///     .build()?;
/// scheduler.startup();
/// ```
#[derive(Default)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    spawner: Option<Arc<dyn Spawn>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl SchedulerBuilder {
    /// Start from default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate.
    pub fn from_config(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        Ok(Self {
            config,
            spawner: None,
            ids: None,
        })
    }

    /// Override the concurrency ceiling.
    #[must_use]
    pub const fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Override the idle heartbeat interval.
    #[must_use]
    pub const fn heartbeat(mut self, heartbeat: Duration) -> Self {
        self.config.heartbeat_ms = heartbeat.as_millis() as u64;
        self
    }

    /// Override the start/cancel acknowledgment deadline.
    #[must_use]
    pub const fn ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.config.ack_timeout_ms = ack_timeout.as_millis() as u64;
        self
    }

    /// Bound the registry.
    #[must_use]
    pub const fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = Some(capacity);
        self
    }

    /// Use a specific spawner instead of the ambient tokio runtime.
    #[must_use]
    pub fn spawner(mut self, spawner: Arc<dyn Spawn>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Use a specific id source instead of the monotonic default.
    #[must_use]
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Validate and build the scheduler.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate or no
    /// spawner was provided outside a tokio runtime.
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        self.config.validate()?;
        let spawner = match self.spawner {
            Some(spawner) => spawner,
            None => Arc::new(TokioSpawner::current()?),
        };
        let options = self.config.to_options();
        Ok(match self.ids {
            Some(ids) => Scheduler::with_id_generator(options, spawner, ids),
            None => Scheduler::new(options, spawner),
        })
    }
}

impl std::fmt::Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerBuilder")
            .field("config", &self.config)
            .field("custom_spawner", &self.spawner.is_some())
            .field("custom_ids", &self.ids.is_some())
            .finish()
    }
}
