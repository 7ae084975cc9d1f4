//! # clevent Core
//!
//! Asynchronous event and kernel-dispatch runtime over a low-level compute
//! device API.
//!
//! The device API is reached through the [`NativeDriver`] trait: opaque
//! handles, integer status codes and completion callbacks that fire on
//! arbitrary threads. On top of it this crate provides:
//!
//! - [`Kernel`] - argument binding, dispatch geometry, blocking and
//!   event-returning dispatch
//! - [`Event`] - single-resolution future for one unit of device work, with
//!   continuations and dependency tracking
//! - [`EventScheduler`] - the loop that turns native completion callbacks
//!   into event resolutions and runs continuations
//! - [`Device`], [`CommandQueue`], [`Program`], [`Buffer`] - thin owners of
//!   the corresponding native objects
//!
//! ## Example
//!
//! ```ignore
//! use clevent_core::prelude::*;
//!
//! let mut kernel = program.kernel("hello")?;
//! kernel.bind_buffer(0, &buffer)?;
//! kernel.set_global_work_size(64, 0, 0);
//!
//! let event = kernel.run_async(&device, &[]);
//! event.then(|_, outcome| println!("finished: {:?}", outcome));
//! device.scheduler().run_until_resolved(&event)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod args;
pub mod buffer;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod kernel;
pub mod native;
pub mod program;
pub mod queue;
pub mod scheduler;
pub mod work;

#[cfg(test)]
mod mock;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::args::{ArgumentBinder, KernelArg};
    pub use crate::buffer::{Buffer, ReadTransfer};
    pub use crate::config::{SchedulerConfig, SchedulerConfigBuilder};
    pub use crate::device::{Device, DeviceInfo};
    pub use crate::error::*;
    pub use crate::event::{Event, EventId, Resolver};
    pub use crate::kernel::Kernel;
    pub use crate::native::{
        status, EventHandle, KernelHandle, MemHandle, NativeDriver, NativeEvent, NativeStatus,
        ProgramHandle, QueueHandle, SharedDriver,
    };
    pub use crate::program::Program;
    pub use crate::queue::CommandQueue;
    pub use crate::scheduler::{DispatcherHandle, EventScheduler, SchedulerStats};
    pub use crate::work::{WorkDescriptor, MAX_WORK_DIMS};
}

pub use buffer::Buffer;
pub use device::Device;
pub use error::{CleventError, Result};
pub use event::{Event, Resolver};
pub use kernel::Kernel;
pub use native::NativeDriver;
pub use program::Program;
pub use queue::CommandQueue;
pub use scheduler::EventScheduler;
