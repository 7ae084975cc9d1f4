//! Command queues.

use std::fmt;
use std::sync::Arc;

use crate::error::{translate_native_error, CleventError, Result};
use crate::event::Event;
use crate::native::{
    raw_handles, status, EventHandle, NativeDriver, NativeEvent, NativeStatus, QueueHandle,
    SharedDriver,
};
use crate::scheduler::EventScheduler;

struct QueueInner {
    handle: QueueHandle,
    device: String,
    driver: SharedDriver,
    scheduler: EventScheduler,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        let code = self.driver.release_queue(self.handle);
        if code != status::SUCCESS {
            tracing::error!(queue = %self.handle, code, "command queue release failed");
        }
    }
}

/// Ordered submission channel bound to one device.
///
/// Shared by clone; the native queue is released when the last clone drops.
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<QueueInner>,
}

impl CommandQueue {
    /// Take ownership of a native queue created for `device`.
    pub fn from_native(
        driver: SharedDriver,
        handle: QueueHandle,
        device: impl Into<String>,
        scheduler: EventScheduler,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                handle,
                device: device.into(),
                driver,
                scheduler,
            }),
        }
    }

    /// Native handle.
    pub fn handle(&self) -> QueueHandle {
        self.inner.handle
    }

    /// Name of the owning device.
    pub fn device_name(&self) -> &str {
        &self.inner.device
    }

    /// Driver the queue belongs to.
    pub fn driver(&self) -> &SharedDriver {
        &self.inner.driver
    }

    /// Scheduler that resolves events of this queue.
    pub fn scheduler(&self) -> &EventScheduler {
        &self.inner.scheduler
    }

    /// Issue queued commands to the device without waiting for them.
    pub fn flush(&self) -> Result<()> {
        translate_native_error(self.inner.driver.flush(self.inner.handle))
    }

    /// Block until every command submitted so far has finished.
    ///
    /// Individual command failures are reported through their events, not
    /// here. Events of finished commands are still resolved by the
    /// scheduler loop.
    pub fn finish(&self) -> Result<()> {
        tracing::debug!(queue = %self.inner.handle, "Finishing queue");
        translate_native_error(self.inner.driver.finish(self.inner.handle))
    }

    /// Enqueue a command and hand back its event.
    ///
    /// Never fails: an enqueue error produces an event that is already
    /// resolved with that error. On success the event records `wait` as its
    /// dependencies and is watched by the queue's scheduler.
    pub(crate) fn submit<F>(&self, command: &'static str, wait: &[Event], enqueue: F) -> Event
    where
        F: FnOnce(&dyn NativeDriver, QueueHandle, &[EventHandle]) -> std::result::Result<EventHandle, NativeStatus>,
    {
        let wait_list = Event::native_wait_list(wait);
        let enqueued = enqueue(
            self.inner.driver.as_ref(),
            self.inner.handle,
            &raw_handles(&wait_list),
        );
        drop(wait_list);

        match enqueued {
            Ok(handle) => {
                let native = NativeEvent::adopt(Arc::clone(&self.inner.driver), handle);
                let event = Event::new(&self.inner.scheduler, Some(self.clone()), Some(native));
                event.set_dependencies(wait);
                tracing::debug!(
                    queue = %self.inner.handle,
                    event = %event.id(),
                    command,
                    waits = wait.len(),
                    "Enqueued command"
                );
                match event.steal_resolver() {
                    Ok(resolver) => self.inner.scheduler.watch(resolver),
                    Err(err) => tracing::error!(event = %event.id(), error = %err, "fresh event had no resolver"),
                }
                event
            }
            Err(code) => {
                tracing::warn!(queue = %self.inner.handle, command, code, "enqueue failed");
                Event::failed(
                    &self.inner.scheduler,
                    Some(self.clone()),
                    CleventError::native(code),
                )
            }
        }
    }

    /// Enqueue a command and block until it finishes.
    ///
    /// The native completion handle is released before returning.
    pub(crate) fn submit_sync<F>(&self, command: &'static str, wait: &[Event], enqueue: F) -> Result<()>
    where
        F: FnOnce(&dyn NativeDriver, QueueHandle, &[EventHandle]) -> std::result::Result<EventHandle, NativeStatus>,
    {
        let wait_list = Event::native_wait_list(wait);
        let handle = enqueue(
            self.inner.driver.as_ref(),
            self.inner.handle,
            &raw_handles(&wait_list),
        )
        .map_err(|code| {
            tracing::warn!(queue = %self.inner.handle, command, code, "enqueue failed");
            CleventError::native(code)
        })?;
        drop(wait_list);

        let native = NativeEvent::adopt(Arc::clone(&self.inner.driver), handle);
        tracing::debug!(queue = %self.inner.handle, command, "Waiting for command");
        translate_native_error(native.wait())
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("handle", &self.inner.handle)
            .field("device", &self.inner.device)
            .finish()
    }
}
