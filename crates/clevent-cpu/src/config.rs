//! CPU backend configuration.

use clevent_core::error::{CleventError, Result};

use crate::driver::DEFAULT_LAUNCH_HISTORY;

/// Execution order of commands on a CPU queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueMode {
    /// One worker thread per queue; commands run in submission order.
    #[default]
    InOrder,
    /// A thread per command; only wait lists order execution.
    OutOfOrder,
}

/// Configuration for the CPU platform.
#[derive(Debug, Clone)]
pub struct CpuConfig {
    /// Number of devices to expose.
    pub num_devices: usize,
    /// Whether each device gets a default command queue.
    pub default_queue: bool,
    /// Execution order of device queues.
    pub queue_mode: QueueMode,
    /// Largest work-group size a dispatch may request.
    pub max_work_group_size: usize,
    /// Device names are this prefix followed by the device index.
    pub device_name_prefix: String,
    /// Number of recent kernel launches the driver remembers. Zero turns
    /// recording off.
    pub launch_history: usize,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            num_devices: 1,
            default_queue: true,
            queue_mode: QueueMode::InOrder,
            max_work_group_size: 1024,
            device_name_prefix: "cpu".to_string(),
            launch_history: DEFAULT_LAUNCH_HISTORY,
        }
    }
}

impl CpuConfig {
    /// Creates a configuration whose devices have no default queue.
    #[must_use]
    pub fn queueless() -> Self {
        Self {
            default_queue: false,
            ..Self::default()
        }
    }

    /// Creates a configuration with out-of-order queues.
    #[must_use]
    pub fn out_of_order() -> Self {
        Self {
            queue_mode: QueueMode::OutOfOrder,
            ..Self::default()
        }
    }

    /// Checks the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.num_devices == 0 {
            return Err(CleventError::config("num_devices must be at least 1"));
        }
        if self.max_work_group_size == 0 {
            return Err(CleventError::config("max_work_group_size must be at least 1"));
        }
        Ok(())
    }
}

/// Builder for CpuConfig.
#[derive(Debug, Default)]
pub struct CpuConfigBuilder {
    config: CpuConfig,
}

impl CpuConfigBuilder {
    /// Creates a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of devices.
    #[must_use]
    pub fn with_devices(mut self, count: usize) -> Self {
        self.config.num_devices = count;
        self
    }

    /// Enables or disables default queues.
    #[must_use]
    pub fn with_default_queue(mut self, enabled: bool) -> Self {
        self.config.default_queue = enabled;
        self
    }

    /// Sets the queue execution order.
    #[must_use]
    pub fn with_queue_mode(mut self, mode: QueueMode) -> Self {
        self.config.queue_mode = mode;
        self
    }

    /// Sets the largest accepted work-group size.
    #[must_use]
    pub fn with_max_work_group_size(mut self, size: usize) -> Self {
        self.config.max_work_group_size = size;
        self
    }

    /// Sets the device name prefix.
    #[must_use]
    pub fn with_device_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.device_name_prefix = prefix.into();
        self
    }

    /// Sets how many recent kernel launches are recorded.
    #[must_use]
    pub fn with_launch_history(mut self, history: usize) -> Self {
        self.config.launch_history = history;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<CpuConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
