//! Dispatch geometry.

use crate::error::{CleventError, Result};
use crate::native::NdRange;

/// Maximum number of work dimensions.
pub const MAX_WORK_DIMS: u8 = 3;

/// Global/local work sizes and dimension count of a kernel dispatch.
///
/// A leading zero in either size vector means "not specified": the native
/// call receives no value for that parameter. Elements past the dimension
/// count are kept but ignored at dispatch time. Dimension and sizes are not
/// cross-validated; mismatches are reported by the native layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkDescriptor {
    global: [usize; 3],
    local: [usize; 3],
    work_dim: u8,
}

impl Default for WorkDescriptor {
    fn default() -> Self {
        Self {
            global: [0; 3],
            local: [0; 3],
            work_dim: 1,
        }
    }
}

impl WorkDescriptor {
    /// Create a one-dimensional descriptor with no sizes set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of dimensions. Must be in `1..=3`.
    pub fn set_work_dim(&mut self, work_dim: u8) -> Result<()> {
        if work_dim == 0 || work_dim > MAX_WORK_DIMS {
            return Err(CleventError::invalid_argument(format!(
                "work dimension must be between 1 and {}, got {}",
                MAX_WORK_DIMS, work_dim
            )));
        }
        self.work_dim = work_dim;
        Ok(())
    }

    /// Builder-style variant of [`set_work_dim`](Self::set_work_dim).
    pub fn with_work_dim(mut self, work_dim: u8) -> Result<Self> {
        self.set_work_dim(work_dim)?;
        Ok(self)
    }

    /// Set the global work size.
    pub fn set_global(&mut self, size: [usize; 3]) {
        self.global = size;
    }

    /// Set the local work size.
    pub fn set_local(&mut self, size: [usize; 3]) {
        self.local = size;
    }

    /// Builder-style variant of [`set_global`](Self::set_global).
    #[must_use]
    pub fn with_global(mut self, size: [usize; 3]) -> Self {
        self.global = size;
        self
    }

    /// Builder-style variant of [`set_local`](Self::set_local).
    #[must_use]
    pub fn with_local(mut self, size: [usize; 3]) -> Self {
        self.local = size;
        self
    }

    /// Configured dimension count.
    pub fn work_dim(&self) -> u8 {
        self.work_dim
    }

    /// Full global size vector, including ignored trailing elements.
    pub fn global(&self) -> [usize; 3] {
        self.global
    }

    /// Full local size vector, including ignored trailing elements.
    pub fn local(&self) -> [usize; 3] {
        self.local
    }

    /// Whether a global size will be passed at dispatch.
    pub fn has_global(&self) -> bool {
        self.global[0] != 0
    }

    /// Whether a local size will be passed at dispatch.
    pub fn has_local(&self) -> bool {
        self.local[0] != 0
    }

    /// Geometry as seen by the native enqueue call.
    pub fn nd_range(&self) -> NdRange {
        let dims = self.work_dim as usize;
        let effective = |size: &[usize; 3]| (size[0] != 0).then(|| size[..dims].to_vec());
        NdRange {
            work_dim: u32::from(self.work_dim),
            global: effective(&self.global),
            local: effective(&self.local),
        }
    }
}
