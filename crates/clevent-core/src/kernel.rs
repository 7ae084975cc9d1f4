//! Kernels: argument binding, dispatch geometry and execution.
//!
//! A [`Kernel`] is created from a [`Program`] by name. Arguments and
//! geometry are set on it, then it is dispatched on a device's default
//! queue either blocking ([`Kernel::run_sync`]) or through an [`Event`]
//! ([`Kernel::run_async`]).
//!
//! ```ignore
//! let mut kernel = program.kernel("scale")?;
//! kernel.bind_buffer(0, &buffer)?;
//! kernel.bind_value(1, &2.0f32)?;
//! kernel.set_global_work_size(1024, 0, 0);
//!
//! let first = kernel.run_async(&device, &[]);
//! let second = kernel.run_async(&device, &[first.clone()]);
//! second.then(|_, outcome| println!("done: {:?}", outcome));
//! ```

use std::fmt;

use bytemuck::Pod;

use crate::args::{ArgumentBinder, KernelArg};
use crate::buffer::Buffer;
use crate::device::Device;
use crate::error::{CleventError, Result};
use crate::event::Event;
use crate::native::{status, KernelHandle};
use crate::program::Program;
use crate::work::WorkDescriptor;

/// Compiled entry point with bound arguments and dispatch geometry.
pub struct Kernel {
    program: Program,
    name: String,
    handle: KernelHandle,
    work: WorkDescriptor,
    args: ArgumentBinder,
}

impl Kernel {
    pub(crate) fn new(program: Program, name: &str, handle: KernelHandle) -> Self {
        Self {
            program,
            name: name.to_string(),
            handle,
            work: WorkDescriptor::default(),
            args: ArgumentBinder::new(),
        }
    }

    /// Entry point name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Native handle.
    pub fn handle(&self) -> KernelHandle {
        self.handle
    }

    /// Program this kernel was created from.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Current dispatch geometry.
    pub fn work(&self) -> &WorkDescriptor {
        &self.work
    }

    /// Bound arguments.
    pub fn args(&self) -> &ArgumentBinder {
        &self.args
    }

    fn bind_arg(&mut self, index: u32, arg: KernelArg) -> Result<()> {
        let driver = self.program.driver().as_ref();
        self.args.bind(driver, self.handle, index, arg)
    }

    /// Bind raw bytes to parameter `index`.
    pub fn bind(&mut self, index: u32, bytes: &[u8]) -> Result<()> {
        self.bind_arg(index, KernelArg::Bytes(bytes.to_vec()))
    }

    /// Bind a plain-old-data value to parameter `index`.
    pub fn bind_value<T: Pod>(&mut self, index: u32, value: &T) -> Result<()> {
        self.bind_arg(index, KernelArg::value(value))
    }

    /// Bind a slice of plain-old-data values to parameter `index`.
    pub fn bind_slice<T: Pod>(&mut self, index: u32, values: &[T]) -> Result<()> {
        self.bind_arg(index, KernelArg::slice(values))
    }

    /// Bind a device buffer to parameter `index`.
    pub fn bind_buffer(&mut self, index: u32, buffer: &Buffer) -> Result<()> {
        self.bind_arg(index, KernelArg::Buffer(buffer.clone()))
    }

    /// Set the number of work dimensions (1 to 3).
    pub fn set_work_dimension(&mut self, work_dim: u8) -> Result<()> {
        self.work.set_work_dim(work_dim).map_err(|err| {
            tracing::warn!(kernel = %self.name, work_dim, "rejected work dimension");
            err
        })
    }

    /// Set the global work size. A zero first element leaves it unspecified.
    pub fn set_global_work_size(&mut self, x: usize, y: usize, z: usize) {
        self.work.set_global([x, y, z]);
    }

    /// Set the local work size. A zero first element leaves it unspecified.
    pub fn set_local_work_size(&mut self, x: usize, y: usize, z: usize) {
        self.work.set_local([x, y, z]);
    }

    /// Dispatch on the device's default queue and block until it finishes.
    ///
    /// The dispatch waits for every event in `wait` first.
    pub fn run_sync(&self, device: &Device, wait: &[Event]) -> Result<()> {
        let queue = device.require_queue().map_err(|err| {
            tracing::warn!(kernel = %self.name, device = device.name(), "no default queue");
            err
        })?;
        let range = self.work.nd_range();
        queue.submit_sync("nd_range", wait, |driver, q, wait_list| {
            driver.enqueue_nd_range(q, self.handle, &range, wait_list)
        })
    }

    /// Dispatch on the device's default queue without blocking.
    ///
    /// Always returns an event. Failures before or during enqueue come back
    /// as an event that is already resolved with the error.
    pub fn run_async(&self, device: &Device, wait: &[Event]) -> Event {
        let Some(queue) = device.default_queue() else {
            tracing::warn!(kernel = %self.name, device = device.name(), "no default queue");
            return Event::failed(
                device.scheduler(),
                None,
                CleventError::no_queue(device.name()),
            );
        };
        let range = self.work.nd_range();
        let handle = self.handle;
        queue.submit("nd_range", wait, move |driver, q, wait_list| {
            driver.enqueue_nd_range(q, handle, &range, wait_list)
        })
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        let code = self.program.driver().release_kernel(self.handle);
        if code != status::SUCCESS {
            tracing::error!(kernel = %self.handle, code, "kernel release failed");
        }
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("work", &self.work)
            .field("args", &self.args.len())
            .finish()
    }
}
