//! Devices.

use std::fmt;
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::error::{CleventError, Result};
use crate::event::Event;
use crate::native::{QueueHandle, SharedDriver};
use crate::queue::CommandQueue;
use crate::scheduler::EventScheduler;

/// Static properties of a device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device name.
    pub name: String,
    /// Largest work-group size the device accepts.
    pub max_work_group_size: usize,
}

struct DeviceInner {
    info: DeviceInfo,
    driver: SharedDriver,
    default_queue: Option<CommandQueue>,
    scheduler: EventScheduler,
}

/// Compute device with an optional default command queue.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Create a device.
    ///
    /// `default_queue` is a native queue created by the backend for this
    /// device; the device takes ownership of it. A device without one
    /// rejects dispatches with [`CleventError::NoQueue`].
    pub fn new(
        info: DeviceInfo,
        driver: SharedDriver,
        scheduler: EventScheduler,
        default_queue: Option<QueueHandle>,
    ) -> Self {
        let default_queue = default_queue.map(|handle| {
            CommandQueue::from_native(
                Arc::clone(&driver),
                handle,
                info.name.clone(),
                scheduler.clone(),
            )
        });
        Self {
            inner: Arc::new(DeviceInner {
                info,
                driver,
                default_queue,
                scheduler,
            }),
        }
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.inner.info.name
    }

    /// Static properties.
    pub fn info(&self) -> &DeviceInfo {
        &self.inner.info
    }

    /// Largest accepted work-group size.
    pub fn max_work_group_size(&self) -> usize {
        self.inner.info.max_work_group_size
    }

    /// Driver the device belongs to.
    pub fn driver(&self) -> &SharedDriver {
        &self.inner.driver
    }

    /// Scheduler that resolves this device's events.
    pub fn scheduler(&self) -> &EventScheduler {
        &self.inner.scheduler
    }

    /// Default command queue, if the device has one.
    pub fn default_queue(&self) -> Option<&CommandQueue> {
        self.inner.default_queue.as_ref()
    }

    /// Default command queue, or [`CleventError::NoQueue`].
    pub fn require_queue(&self) -> Result<&CommandQueue> {
        self.default_queue()
            .ok_or_else(|| CleventError::no_queue(self.name()))
    }

    /// Blocking read from `buffer` through the default queue.
    pub fn read_buffer_sync(
        &self,
        buffer: &Buffer,
        offset: usize,
        target: &mut [u8],
        wait: &[Event],
    ) -> Result<()> {
        buffer.read_sync(self.require_queue()?, offset, target, wait)
    }

    /// Blocking write to `buffer` through the default queue.
    pub fn write_buffer_sync(
        &self,
        buffer: &Buffer,
        offset: usize,
        data: &[u8],
        wait: &[Event],
    ) -> Result<()> {
        buffer.write_sync(self.require_queue()?, offset, data, wait)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.inner.info.name)
            .field("driver", &self.inner.driver.name())
            .field("default_queue", &self.inner.default_queue.as_ref().map(CommandQueue::handle))
            .finish()
    }
}
