//! Built programs.

use std::fmt;
use std::sync::Arc;

use crate::error::{CleventError, Result};
use crate::kernel::Kernel;
use crate::native::{status, ProgramHandle, SharedDriver};

struct ProgramInner {
    handle: ProgramHandle,
    driver: SharedDriver,
}

impl Drop for ProgramInner {
    fn drop(&mut self) {
        let code = self.driver.release_program(self.handle);
        if code != status::SUCCESS {
            tracing::error!(program = %self.handle, code, "program release failed");
        }
    }
}

/// A built program from which kernels are looked up by name.
///
/// Kernels keep their program alive.
#[derive(Clone)]
pub struct Program {
    inner: Arc<ProgramInner>,
}

impl Program {
    /// Take ownership of a program the backend has already built.
    pub fn from_native(driver: SharedDriver, handle: ProgramHandle) -> Self {
        Self {
            inner: Arc::new(ProgramInner { handle, driver }),
        }
    }

    /// Native handle.
    pub fn handle(&self) -> ProgramHandle {
        self.inner.handle
    }

    /// Driver the program belongs to.
    pub fn driver(&self) -> &SharedDriver {
        &self.inner.driver
    }

    /// Create a kernel object for the entry point `name`.
    pub fn kernel(&self, name: &str) -> Result<Kernel> {
        let handle = self
            .inner
            .driver
            .create_kernel(self.inner.handle, name)
            .map_err(|code| {
                tracing::warn!(program = %self.inner.handle, name, code, "kernel creation failed");
                CleventError::native(code)
            })?;
        tracing::debug!(program = %self.inner.handle, name, kernel = %handle, "Created kernel");
        Ok(Kernel::new(self.clone(), name, handle))
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("handle", &self.inner.handle)
            .field("driver", &self.inner.driver.name())
            .finish()
    }
}
