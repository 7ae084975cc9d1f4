//! Device buffers and host transfers.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CleventError, Result};
use crate::event::Event;
use crate::native::{status, HostBlock, MemHandle, SharedDriver};
use crate::queue::CommandQueue;

struct BufferInner {
    handle: MemHandle,
    size: usize,
    driver: SharedDriver,
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        let code = self.driver.release_mem(self.handle);
        if code != status::SUCCESS {
            tracing::error!(mem = %self.handle, code, "buffer release failed");
        }
    }
}

/// Device memory object of a fixed byte size.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

/// Pending device-to-host copy.
#[derive(Debug)]
pub struct ReadTransfer {
    /// Completion of the copy.
    pub event: Event,
    /// Host block the data lands in.
    pub block: HostBlock,
}

impl ReadTransfer {
    /// Block until the copy is done and take the data.
    pub fn wait(self) -> Result<Vec<u8>> {
        self.event.wait_sync()?;
        let data = std::mem::take(&mut *self.block.lock());
        Ok(data)
    }

    /// Copy of the host block as it is now.
    pub fn snapshot(&self) -> Vec<u8> {
        self.block.lock().clone()
    }
}

impl Buffer {
    /// Take ownership of a native memory object of `size` bytes.
    pub fn from_native(driver: SharedDriver, handle: MemHandle, size: usize) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                handle,
                size,
                driver,
            }),
        }
    }

    /// Native handle.
    pub fn native_handle(&self) -> MemHandle {
        self.inner.handle
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.inner.size => Ok(()),
            _ => Err(CleventError::invalid_argument(format!(
                "range {}..{} outside buffer of {} bytes",
                offset,
                offset.saturating_add(len),
                self.inner.size
            ))),
        }
    }

    /// Copy `target.len()` bytes starting at `offset` into `target`,
    /// blocking until done.
    pub fn read_sync(
        &self,
        queue: &CommandQueue,
        offset: usize,
        target: &mut [u8],
        wait: &[Event],
    ) -> Result<()> {
        self.check_range(offset, target.len())?;
        let block: HostBlock = Arc::new(Mutex::new(vec![0; target.len()]));
        let mem = self.inner.handle;
        queue.submit_sync("read_buffer", wait, |driver, q, wait_list| {
            driver.enqueue_read_buffer(q, mem, offset, Arc::clone(&block), wait_list)
        })?;
        target.copy_from_slice(&block.lock());
        Ok(())
    }

    /// Copy `data` into the buffer starting at `offset`, blocking until done.
    pub fn write_sync(
        &self,
        queue: &CommandQueue,
        offset: usize,
        data: &[u8],
        wait: &[Event],
    ) -> Result<()> {
        self.check_range(offset, data.len())?;
        let mem = self.inner.handle;
        queue.submit_sync("write_buffer", wait, |driver, q, wait_list| {
            driver.enqueue_write_buffer(q, mem, offset, data.to_vec(), wait_list)
        })
    }

    /// Start a copy of `len` bytes at `offset` to the host.
    ///
    /// Always returns a transfer; failures are carried by its event.
    pub fn read(&self, queue: &CommandQueue, offset: usize, len: usize, wait: &[Event]) -> ReadTransfer {
        let block: HostBlock = Arc::new(Mutex::new(vec![0; len]));
        let event = match self.check_range(offset, len) {
            Ok(()) => {
                let mem = self.inner.handle;
                let target = Arc::clone(&block);
                queue.submit("read_buffer", wait, move |driver, q, wait_list| {
                    driver.enqueue_read_buffer(q, mem, offset, target, wait_list)
                })
            }
            Err(err) => Event::failed(queue.scheduler(), Some(queue.clone()), err),
        };
        ReadTransfer { event, block }
    }

    /// Start a copy of `data` into the buffer at `offset`.
    ///
    /// Always returns an event; failures are carried by it.
    pub fn write(&self, queue: &CommandQueue, offset: usize, data: &[u8], wait: &[Event]) -> Event {
        if let Err(err) = self.check_range(offset, data.len()) {
            return Event::failed(queue.scheduler(), Some(queue.clone()), err);
        }
        let mem = self.inner.handle;
        let data = data.to_vec();
        queue.submit("write_buffer", wait, move |driver, q, wait_list| {
            driver.enqueue_write_buffer(q, mem, offset, data, wait_list)
        })
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.inner.handle)
            .field("size", &self.inner.size)
            .finish()
    }
}
