//! # clevent CPU Backend
//!
//! Host-thread device backend for clevent. Kernels are plain Rust functions
//! registered in a [`CpuProgram`]; dispatches run on worker threads and
//! report completion through the same callback protocol a GPU driver uses.
//!
//! ## Example
//!
//! ```ignore
//! use clevent_cpu::prelude::*;
//!
//! let platform = CpuPlatform::with_defaults()?;
//! let program = platform.build_program(CpuProgram::new().kernel(
//!     "double",
//!     &[ParamKind::Buffer],
//!     |launch| {
//!         let values: Vec<f32> = launch.read(0)?;
//!         let doubled: Vec<f32> = values.iter().map(|v| v * 2.0).collect();
//!         launch.write(0, &doubled)
//!     },
//! ));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod driver;
pub mod platform;
pub mod program;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{CpuConfig, CpuConfigBuilder, QueueMode};
    pub use crate::driver::{CpuDriver, LaunchRecord};
    pub use crate::platform::CpuPlatform;
    pub use crate::program::{CpuKernelDef, CpuProgram, KernelFn, KernelLaunch, MemoryBlock, ParamKind};
}

pub use config::{CpuConfig, QueueMode};
pub use driver::CpuDriver;
pub use platform::CpuPlatform;
pub use program::{CpuProgram, KernelLaunch, ParamKind};
