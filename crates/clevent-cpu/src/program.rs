//! Host-side kernel programs.
//!
//! The CPU backend has no compiler. A program is a table of Rust functions,
//! each registered under a kernel name together with its parameter list.
//! One function call handles a whole dispatch.

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::Mutex;

use clevent_core::native::{status, NativeStatus};

/// Device memory of the CPU backend.
pub type MemoryBlock = Arc<Mutex<Vec<u8>>>;

/// Kind of one kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Device buffer.
    Buffer,
    /// By-value scalar of the given byte size.
    Scalar(usize),
}

impl ParamKind {
    /// Scalar parameter sized for `T`.
    pub fn scalar<T: Pod>() -> Self {
        Self::Scalar(std::mem::size_of::<T>())
    }
}

/// Body of a CPU kernel. Returning an error fails the command with that
/// execution status.
pub type KernelFn = Arc<dyn Fn(&KernelLaunch) -> Result<(), NativeStatus> + Send + Sync>;

/// One registered kernel.
#[derive(Clone)]
pub struct CpuKernelDef {
    /// Kernel name.
    pub name: String,
    /// Parameter list.
    pub params: Vec<ParamKind>,
    /// Kernel body.
    pub func: KernelFn,
}

impl fmt::Debug for CpuKernelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuKernelDef")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

/// Table of kernels, the CPU equivalent of a built program.
#[derive(Debug, Clone, Default)]
pub struct CpuProgram {
    kernels: Vec<CpuKernelDef>,
}

impl CpuProgram {
    /// Create an empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kernel.
    #[must_use]
    pub fn kernel<F>(mut self, name: impl Into<String>, params: &[ParamKind], func: F) -> Self
    where
        F: Fn(&KernelLaunch) -> Result<(), NativeStatus> + Send + Sync + 'static,
    {
        self.kernels.push(CpuKernelDef {
            name: name.into(),
            params: params.to_vec(),
            func: Arc::new(func),
        });
        self
    }

    /// Look up a kernel by name.
    pub fn find(&self, name: &str) -> Option<&CpuKernelDef> {
        self.kernels.iter().find(|k| k.name == name)
    }

    /// Registered kernel names.
    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.kernels.iter().map(|k| k.name.as_str())
    }
}

/// Argument snapshot taken at enqueue time.
#[derive(Debug, Clone)]
pub(crate) enum LaunchArg {
    Bytes(Vec<u8>),
    Mem(MemoryBlock),
}

/// What a kernel body sees of its dispatch.
#[derive(Debug)]
pub struct KernelLaunch {
    work_dim: u32,
    global: Vec<usize>,
    local: Option<Vec<usize>>,
    args: Vec<LaunchArg>,
}

impl KernelLaunch {
    pub(crate) fn new(
        work_dim: u32,
        global: Vec<usize>,
        local: Option<Vec<usize>>,
        args: Vec<LaunchArg>,
    ) -> Self {
        Self {
            work_dim,
            global,
            local,
            args,
        }
    }

    /// Number of dimensions.
    pub fn work_dim(&self) -> u32 {
        self.work_dim
    }

    /// Global size, one element per dimension.
    pub fn global_size(&self) -> &[usize] {
        &self.global
    }

    /// Local size, if the dispatch specified one.
    pub fn local_size(&self) -> Option<&[usize]> {
        self.local.as_deref()
    }

    /// Total number of work items.
    pub fn work_item_count(&self) -> usize {
        self.global.iter().product()
    }

    /// Global ids of every work item, first dimension fastest. Unused
    /// dimensions are reported as zero.
    pub fn work_items(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        let dim = |i: usize| self.global.get(i).copied().unwrap_or(1);
        let (nx, ny) = (dim(0), dim(1));
        (0..self.work_item_count()).map(move |linear| {
            [linear % nx, (linear / nx) % ny, linear / (nx * ny)]
        })
    }

    fn bytes(&self, index: u32) -> Result<&[u8], NativeStatus> {
        match self.args.get(index as usize) {
            Some(LaunchArg::Bytes(bytes)) => Ok(bytes),
            _ => Err(status::INVALID_ARG_VALUE),
        }
    }

    fn block(&self, index: u32) -> Result<&MemoryBlock, NativeStatus> {
        match self.args.get(index as usize) {
            Some(LaunchArg::Mem(block)) => Ok(block),
            _ => Err(status::INVALID_MEM_OBJECT),
        }
    }

    /// Scalar argument `index`.
    pub fn scalar<T: Pod>(&self, index: u32) -> Result<T, NativeStatus> {
        let bytes = self.bytes(index)?;
        if bytes.len() != std::mem::size_of::<T>() {
            return Err(status::INVALID_ARG_SIZE);
        }
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Contents of buffer argument `index` as a vector of `T`.
    pub fn read<T: Pod>(&self, index: u32) -> Result<Vec<T>, NativeStatus> {
        let block = self.block(index)?.lock();
        Ok(block
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned::<T>)
            .collect())
    }

    /// Overwrite the start of buffer argument `index` with `values`.
    pub fn write<T: Pod>(&self, index: u32, values: &[T]) -> Result<(), NativeStatus> {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let mut block = self.block(index)?.lock();
        if bytes.len() > block.len() {
            return Err(status::INVALID_BUFFER_SIZE);
        }
        block[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Run `f` on the raw bytes of buffer argument `index`.
    pub fn with_buffer<R>(&self, index: u32, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, NativeStatus> {
        let mut block = self.block(index)?.lock();
        Ok(f(block.as_mut_slice()))
    }
}
