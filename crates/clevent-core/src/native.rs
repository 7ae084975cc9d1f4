//! Native driver seam.
//!
//! Everything below this module is the low-level device API: opaque handles,
//! integer status codes and one-shot completion callbacks that may fire on
//! any thread. Backends implement [`NativeDriver`]; the rest of the crate
//! only talks to devices through it.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Native status code. Zero is success, negative values are failures.
pub type NativeStatus = i32;

/// Native status codes (OpenCL numbering).
pub mod status {
    use super::NativeStatus;

    /// Success.
    pub const SUCCESS: NativeStatus = 0;
    /// No device matched.
    pub const DEVICE_NOT_FOUND: NativeStatus = -1;
    /// Device is not available.
    pub const DEVICE_NOT_AVAILABLE: NativeStatus = -2;
    /// No compiler available.
    pub const COMPILER_NOT_AVAILABLE: NativeStatus = -3;
    /// Memory object allocation failed.
    pub const MEM_OBJECT_ALLOCATION_FAILURE: NativeStatus = -4;
    /// Device ran out of resources.
    pub const OUT_OF_RESOURCES: NativeStatus = -5;
    /// Host ran out of memory.
    pub const OUT_OF_HOST_MEMORY: NativeStatus = -6;
    /// Program build failed.
    pub const BUILD_PROGRAM_FAILURE: NativeStatus = -11;
    /// A command in the wait list failed.
    pub const EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST: NativeStatus = -14;
    /// Invalid value.
    pub const INVALID_VALUE: NativeStatus = -30;
    /// Invalid device.
    pub const INVALID_DEVICE: NativeStatus = -33;
    /// Invalid context.
    pub const INVALID_CONTEXT: NativeStatus = -34;
    /// Invalid command queue.
    pub const INVALID_COMMAND_QUEUE: NativeStatus = -36;
    /// Invalid memory object.
    pub const INVALID_MEM_OBJECT: NativeStatus = -38;
    /// Invalid program.
    pub const INVALID_PROGRAM: NativeStatus = -44;
    /// No kernel with that name in the program.
    pub const INVALID_KERNEL_NAME: NativeStatus = -46;
    /// Invalid kernel.
    pub const INVALID_KERNEL: NativeStatus = -48;
    /// Argument index out of range.
    pub const INVALID_ARG_INDEX: NativeStatus = -49;
    /// Argument value rejected.
    pub const INVALID_ARG_VALUE: NativeStatus = -50;
    /// Argument size does not match the parameter.
    pub const INVALID_ARG_SIZE: NativeStatus = -51;
    /// Some kernel arguments were never set.
    pub const INVALID_KERNEL_ARGS: NativeStatus = -52;
    /// Work dimension out of range.
    pub const INVALID_WORK_DIMENSION: NativeStatus = -53;
    /// Local size incompatible with global size or device limits.
    pub const INVALID_WORK_GROUP_SIZE: NativeStatus = -54;
    /// Malformed wait list.
    pub const INVALID_EVENT_WAIT_LIST: NativeStatus = -57;
    /// Invalid event.
    pub const INVALID_EVENT: NativeStatus = -58;
    /// Operation not valid in the current state.
    pub const INVALID_OPERATION: NativeStatus = -59;
    /// Buffer access out of bounds.
    pub const INVALID_BUFFER_SIZE: NativeStatus = -61;
    /// Global work size missing or invalid.
    pub const INVALID_GLOBAL_WORK_SIZE: NativeStatus = -63;
}

macro_rules! native_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw native value.
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Raw native value.
            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

native_handle!(
    /// Compiled program.
    ProgramHandle
);
native_handle!(
    /// Kernel object created from a program.
    KernelHandle
);
native_handle!(
    /// Command queue bound to one device.
    QueueHandle
);
native_handle!(
    /// Device memory object.
    MemHandle
);
native_handle!(
    /// Completion handle of one enqueued command.
    EventHandle
);

/// Value handed to the native layer for one kernel parameter.
#[derive(Debug, Clone, Copy)]
pub enum ArgValue<'a> {
    /// Raw host bytes, copied by the native layer.
    Bytes(&'a [u8]),
    /// Device memory object.
    Mem(MemHandle),
}

/// Dispatch geometry as received by the native enqueue call.
///
/// Size slices are already truncated to `work_dim`; `None` means the
/// parameter is left unspecified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdRange {
    /// Number of dimensions (1..=3).
    pub work_dim: u32,
    /// Global work size, if specified.
    pub global: Option<Vec<usize>>,
    /// Local work size, if specified.
    pub local: Option<Vec<usize>>,
}

/// Host memory block shared with the native layer for transfers.
pub type HostBlock = Arc<Mutex<Vec<u8>>>;

/// One-shot native completion callback. Receives the terminal execution
/// status of the command and may be invoked from any thread.
pub type CompletionCallback = Box<dyn FnOnce(NativeStatus) + Send + 'static>;

/// Low-level device API implemented by each backend.
pub trait NativeDriver: Send + Sync {
    /// Backend name.
    fn name(&self) -> &str;

    /// Create a kernel object from a built program.
    fn create_kernel(&self, program: ProgramHandle, name: &str)
        -> Result<KernelHandle, NativeStatus>;

    /// Set the value of one kernel parameter.
    fn set_kernel_arg(&self, kernel: KernelHandle, index: u32, value: ArgValue<'_>)
        -> NativeStatus;

    /// Enqueue an N-dimensional kernel dispatch.
    fn enqueue_nd_range(
        &self,
        queue: QueueHandle,
        kernel: KernelHandle,
        range: &NdRange,
        wait_list: &[EventHandle],
    ) -> Result<EventHandle, NativeStatus>;

    /// Enqueue a device-to-host copy of `target.len()` bytes starting at `offset`.
    fn enqueue_read_buffer(
        &self,
        queue: QueueHandle,
        mem: MemHandle,
        offset: usize,
        target: HostBlock,
        wait_list: &[EventHandle],
    ) -> Result<EventHandle, NativeStatus>;

    /// Enqueue a host-to-device copy of `data` starting at `offset`.
    fn enqueue_write_buffer(
        &self,
        queue: QueueHandle,
        mem: MemHandle,
        offset: usize,
        data: Vec<u8>,
        wait_list: &[EventHandle],
    ) -> Result<EventHandle, NativeStatus>;

    /// Block until every event is terminal. Returns the first failing
    /// execution status, or success.
    fn wait_for_events(&self, events: &[EventHandle]) -> NativeStatus;

    /// Issue every command queued on `queue` to the device.
    fn flush(&self, queue: QueueHandle) -> NativeStatus;

    /// Block until every command queued on `queue` has finished.
    ///
    /// Reports failures of the queue itself, not of individual commands.
    fn finish(&self, queue: QueueHandle) -> NativeStatus;

    /// Register a completion callback on an event.
    fn set_event_callback(&self, event: EventHandle, callback: CompletionCallback)
        -> NativeStatus;

    /// Add a reference to an event.
    fn retain_event(&self, event: EventHandle) -> NativeStatus;

    /// Drop a reference to an event.
    fn release_event(&self, event: EventHandle) -> NativeStatus;

    /// Drop a kernel object.
    fn release_kernel(&self, kernel: KernelHandle) -> NativeStatus;

    /// Drop a program.
    fn release_program(&self, program: ProgramHandle) -> NativeStatus;

    /// Drop a command queue.
    fn release_queue(&self, queue: QueueHandle) -> NativeStatus;

    /// Drop a memory object.
    fn release_mem(&self, mem: MemHandle) -> NativeStatus;
}

/// Shared driver reference.
pub type SharedDriver = Arc<dyn NativeDriver>;

/// Owned reference to a native event.
///
/// Each value holds exactly one native reference: cloning retains, dropping
/// releases. Whoever consumes the value releases it, so a handle cannot be
/// released twice.
pub struct NativeEvent {
    driver: SharedDriver,
    handle: EventHandle,
}

impl NativeEvent {
    /// Take ownership of a reference returned by an enqueue call.
    pub fn adopt(driver: SharedDriver, handle: EventHandle) -> Self {
        Self { driver, handle }
    }

    /// Raw handle, valid while `self` is alive.
    pub fn handle(&self) -> EventHandle {
        self.handle
    }

    /// Driver that owns the handle.
    pub fn driver(&self) -> &SharedDriver {
        &self.driver
    }

    /// Block until the command completes. Returns the execution status.
    pub fn wait(&self) -> NativeStatus {
        self.driver.wait_for_events(&[self.handle])
    }
}

impl Clone for NativeEvent {
    fn clone(&self) -> Self {
        let code = self.driver.retain_event(self.handle);
        if code != status::SUCCESS {
            tracing::warn!(event = %self.handle, code, "native event retain failed");
        }
        Self {
            driver: Arc::clone(&self.driver),
            handle: self.handle,
        }
    }
}

impl Drop for NativeEvent {
    fn drop(&mut self) {
        let code = self.driver.release_event(self.handle);
        if code != status::SUCCESS {
            tracing::error!(event = %self.handle, code, "native event release failed");
        }
    }
}

impl fmt::Debug for NativeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeEvent")
            .field("driver", &self.driver.name())
            .field("handle", &self.handle)
            .finish()
    }
}

/// Raw handles of a retained wait list.
pub(crate) fn raw_handles(events: &[NativeEvent]) -> Vec<EventHandle> {
    events.iter().map(NativeEvent::handle).collect()
}
