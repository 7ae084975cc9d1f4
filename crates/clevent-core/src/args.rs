//! Kernel argument binding.

use std::collections::BTreeMap;

use bytemuck::Pod;

use crate::buffer::Buffer;
use crate::error::{CleventError, Result};
use crate::native::{status, ArgValue, KernelHandle, NativeDriver};

/// Value bound to one kernel parameter.
#[derive(Debug, Clone)]
pub enum KernelArg {
    /// Raw host bytes.
    Bytes(Vec<u8>),
    /// Device buffer. Bound buffers are kept alive by the binding.
    Buffer(Buffer),
}

impl KernelArg {
    /// Bytes from a plain-old-data value.
    pub fn value<T: Pod>(value: &T) -> Self {
        Self::Bytes(bytemuck::bytes_of(value).to_vec())
    }

    /// Bytes from a slice of plain-old-data values.
    pub fn slice<T: Pod>(values: &[T]) -> Self {
        Self::Bytes(bytemuck::cast_slice(values).to_vec())
    }

    /// Size in bytes handed to the native layer.
    pub fn size(&self) -> usize {
        match self {
            Self::Bytes(bytes) => bytes.len(),
            Self::Buffer(_) => std::mem::size_of::<u64>(),
        }
    }
}

/// Argument slots of one kernel.
///
/// Slots may be bound in any order and rebound at will. Nothing is checked
/// against the kernel signature here; the native layer is the only judge.
#[derive(Debug, Default)]
pub struct ArgumentBinder {
    slots: BTreeMap<u32, KernelArg>,
}

impl ArgumentBinder {
    /// Create an empty binder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand `arg` to the native layer for slot `index` and record it.
    ///
    /// A native rejection leaves the previous binding of the slot in place.
    pub fn bind(
        &mut self,
        driver: &dyn NativeDriver,
        kernel: KernelHandle,
        index: u32,
        arg: KernelArg,
    ) -> Result<()> {
        let code = match &arg {
            KernelArg::Bytes(bytes) => driver.set_kernel_arg(kernel, index, ArgValue::Bytes(bytes)),
            KernelArg::Buffer(buffer) => {
                driver.set_kernel_arg(kernel, index, ArgValue::Mem(buffer.native_handle()))
            }
        };
        if code != status::SUCCESS {
            tracing::warn!(%kernel, index, code, "kernel argument rejected");
            return Err(CleventError::rejected_argument(
                format!("argument {} ({} bytes)", index, arg.size()),
                code,
            ));
        }
        self.slots.insert(index, arg);
        Ok(())
    }

    /// Current binding of a slot.
    pub fn get(&self, index: u32) -> Option<&KernelArg> {
        self.slots.get(&index)
    }

    /// Bound slot indices in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.keys().copied()
    }

    /// Number of bound slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDriver;

    #[test]
    fn test_out_of_order_and_overwrite() {
        let driver = MockDriver::new();
        let kernel = KernelHandle::from_raw(1);
        let mut binder = ArgumentBinder::new();

        binder
            .bind(driver.as_ref(), kernel, 2, KernelArg::value(&7u32))
            .unwrap();
        binder
            .bind(driver.as_ref(), kernel, 0, KernelArg::value(&1.5f32))
            .unwrap();
        binder
            .bind(driver.as_ref(), kernel, 2, KernelArg::value(&9u32))
            .unwrap();

        assert_eq!(binder.len(), 2);
        assert_eq!(binder.indices().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(driver.arg(kernel, 2), Some(9u32.to_le_bytes().to_vec()));
    }

    #[test]
    fn test_native_rejection_is_invalid_argument() {
        let driver = MockDriver::new();
        driver.reject_arg(5, status::INVALID_ARG_INDEX);
        let kernel = KernelHandle::from_raw(1);
        let mut binder = ArgumentBinder::new();

        let err = binder
            .bind(driver.as_ref(), kernel, 5, KernelArg::value(&1i32))
            .unwrap_err();
        assert!(matches!(
            err,
            CleventError::InvalidArgument {
                code: Some(status::INVALID_ARG_INDEX),
                ..
            }
        ));
        assert!(binder.get(5).is_none());
    }

    #[test]
    fn test_slice_size() {
        let arg = KernelArg::slice(&[1i32, 2, 3]);
        assert_eq!(arg.size(), 12);
    }
}
