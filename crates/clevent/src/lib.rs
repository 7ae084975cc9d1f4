//! # clevent
//!
//! Asynchronous event and kernel-dispatch runtime for compute devices.
//!
//! Kernels are dispatched either blocking or through an [`Event`]: a
//! single-resolution handle that settles exactly once when the device work
//! finishes. Native completion notifications may arrive on any thread; an
//! [`EventScheduler`] loop turns them into resolutions and runs the
//! continuations registered with [`Event::then`].
//!
//! ## Quick Start
//!
//! ```ignore
//! use clevent::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let platform = Platform::builder().backend(Backend::Cpu).build()?;
//!     let device = platform.default_device()?;
//!
//!     let program = platform.build_program(CpuProgram::new().kernel(
//!         "hello",
//!         &[ParamKind::Buffer],
//!         |launch| launch.write(0, &[1u32, 2, 3, 4]),
//!     ));
//!     let buffer = platform.create_buffer(16);
//!
//!     let mut kernel = program.kernel("hello")?;
//!     kernel.bind_buffer(0, &buffer)?;
//!     kernel.set_global_work_size(4, 0, 0);
//!
//!     let event = kernel.run_async(device, &[]);
//!     event.then(|_, outcome| println!("hello finished: {:?}", outcome));
//!     platform.scheduler().run_until_resolved(&event)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Backends
//!
//! - **CPU** - host threads running registered Rust kernels (always available)
//!
//! [`Backend::Auto`] selects the best available backend.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(hidden_glob_reexports)]

pub use clevent_core::*;

pub use clevent_cpu::{CpuConfig, CpuDriver, CpuPlatform, CpuProgram, KernelLaunch, ParamKind, QueueMode};

use bytemuck::Pod;

/// Compute backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Pick the best available backend.
    #[default]
    Auto,
    /// Host-thread backend.
    Cpu,
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{Backend, Platform, PlatformBuilder};
    pub use clevent_core::prelude::*;
    pub use clevent_cpu::prelude::*;
}

/// Devices, queues, buffers and programs of one backend.
pub struct Platform {
    backend: Backend,
    inner: CpuPlatform,
}

impl Platform {
    /// Create a new platform builder.
    pub fn builder() -> PlatformBuilder {
        PlatformBuilder::new()
    }

    /// Create a platform with default settings.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Backend in use.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Scheduler resolving this platform's events.
    pub fn scheduler(&self) -> &EventScheduler {
        self.inner.scheduler()
    }

    /// All devices.
    pub fn devices(&self) -> &[Device] {
        self.inner.devices()
    }

    /// Device by index.
    pub fn device(&self, index: usize) -> Option<&Device> {
        self.inner.device(index)
    }

    /// First device.
    pub fn default_device(&self) -> Result<&Device> {
        self.inner.default_device()
    }

    /// Create an additional command queue on `device`.
    pub fn create_queue(&self, device: &Device) -> Result<CommandQueue> {
        self.inner.create_queue(device)
    }

    /// Allocate a zeroed buffer of `size` bytes.
    pub fn create_buffer(&self, size: usize) -> Buffer {
        self.inner.create_buffer(size)
    }

    /// Allocate a buffer initialised with `data`.
    pub fn create_buffer_with<T: Pod>(&self, data: &[T]) -> Buffer {
        self.inner.create_buffer_with(data)
    }

    /// Register a program of host kernels.
    pub fn build_program(&self, program: CpuProgram) -> Program {
        self.inner.build_program(program)
    }

    /// Backend-specific access to the CPU platform.
    pub fn cpu(&self) -> &CpuPlatform {
        &self.inner
    }
}

/// Builder for [`Platform`].
#[derive(Debug, Default)]
pub struct PlatformBuilder {
    backend: Backend,
    cpu: CpuConfig,
    scheduler: Option<EventScheduler>,
}

impl PlatformBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend.
    #[must_use]
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the number of devices.
    #[must_use]
    pub fn devices(mut self, count: usize) -> Self {
        self.cpu.num_devices = count;
        self
    }

    /// Set the queue execution order.
    #[must_use]
    pub fn queue_mode(mut self, mode: QueueMode) -> Self {
        self.cpu.queue_mode = mode;
        self
    }

    /// Create devices without a default command queue.
    #[must_use]
    pub fn without_default_queue(mut self) -> Self {
        self.cpu.default_queue = false;
        self
    }

    /// Replace the CPU backend configuration.
    #[must_use]
    pub fn cpu_config(mut self, config: CpuConfig) -> Self {
        self.cpu = config;
        self
    }

    /// Resolve events on `scheduler` instead of the global one.
    #[must_use]
    pub fn scheduler(mut self, scheduler: EventScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Build the platform.
    pub fn build(self) -> Result<Platform> {
        let scheduler = self.scheduler.unwrap_or_else(EventScheduler::global);
        match self.backend {
            Backend::Auto => tracing::info!("Auto-selected CPU backend (no GPU backend compiled in)"),
            Backend::Cpu => tracing::info!("Using CPU backend"),
        }
        let inner = CpuPlatform::new(self.cpu, scheduler)?;
        Ok(Platform {
            backend: Backend::Cpu,
            inner,
        })
    }
}

/// Backends usable in this build.
pub fn available_backends() -> Vec<Backend> {
    vec![Backend::Cpu]
}
