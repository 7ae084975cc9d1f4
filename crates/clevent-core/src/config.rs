//! Event scheduler configuration.

use std::time::Duration;

use crate::error::{CleventError, Result};

/// Configuration for an [`EventScheduler`](crate::scheduler::EventScheduler).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Name used for log fields and the dispatcher thread.
    pub name: String,
    /// How long a blocking loop iteration waits for a message before it
    /// re-checks its exit condition.
    pub idle_poll_interval: Duration,
    /// Bound of the native completion channel. `None` means unbounded. With
    /// a bound, a full channel blocks a delivering thread while another
    /// thread drains the loop. Continuations are never bounded.
    pub channel_capacity: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "clevent-scheduler".to_string(),
            idle_poll_interval: Duration::from_millis(10),
            channel_capacity: None,
        }
    }
}

impl SchedulerConfig {
    /// Creates a configuration for tests: short poll interval.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            name: "clevent-test".to_string(),
            idle_poll_interval: Duration::from_millis(1),
            channel_capacity: None,
        }
    }

    /// Creates a configuration for long-running loops that mostly sleep.
    #[must_use]
    pub fn low_latency() -> Self {
        Self {
            idle_poll_interval: Duration::from_micros(200),
            ..Self::default()
        }
    }

    /// Checks the configuration for values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.idle_poll_interval.is_zero() {
            return Err(CleventError::config("idle_poll_interval must be non-zero"));
        }
        if self.channel_capacity == Some(0) {
            return Err(CleventError::config(
                "channel_capacity must be at least 1 when bounded",
            ));
        }
        Ok(())
    }
}

/// Builder for SchedulerConfig.
#[derive(Debug, Default)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    /// Creates a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scheduler name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Sets the idle poll interval.
    #[must_use]
    pub fn with_idle_poll_interval(mut self, interval: Duration) -> Self {
        self.config.idle_poll_interval = interval;
        self
    }

    /// Bounds the completion channel.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = Some(capacity);
        self
    }

    /// Makes the completion channel unbounded.
    #[must_use]
    pub fn unbounded(mut self) -> Self {
        self.config.channel_capacity = None;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<SchedulerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
