//! Error types for the clevent runtime.

use thiserror::Error;

use crate::event::EventId;
use crate::native::{status, NativeStatus};

/// Result type for clevent operations.
pub type Result<T> = std::result::Result<T, CleventError>;

/// Errors surfaced by the dispatch and event subsystem.
///
/// The type is `Clone` so that a single event outcome can be handed to
/// every continuation registered on that event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CleventError {
    /// A caller supplied a bad index, size or geometry value, or the native
    /// layer rejected a kernel argument.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong.
        reason: String,
        /// Native status code, when the rejection came from the native layer.
        code: Option<NativeStatus>,
    },

    /// A native call (enqueue, wait, callback registration, ...) failed.
    #[error("Native operation failed: {message} ({code})")]
    NativeOperationFailed {
        /// Native status code.
        code: NativeStatus,
        /// Human readable native message.
        message: String,
    },

    /// The device exposes no usable default command queue.
    #[error("Device '{device}' has no default command queue")]
    NoQueue {
        /// Device name.
        device: String,
    },

    /// An event was resolved twice.
    #[error("Event {event} already resolved")]
    DoubleResolution {
        /// Offending event.
        event: EventId,
    },

    /// The resolver of an event was requested twice.
    #[error("Resolver of event {event} already stolen")]
    DoubleSteal {
        /// Offending event.
        event: EventId,
    },

    /// The scheduler that should deliver a result is gone.
    #[error("Event scheduler shut down")]
    SchedulerShutdown,

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A runtime thread could not be started.
    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),
}

impl CleventError {
    /// Create an invalid argument error raised by the caller side.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
            code: None,
        }
    }

    /// Create an invalid argument error from a native rejection.
    pub fn rejected_argument(reason: impl Into<String>, code: NativeStatus) -> Self {
        Self::InvalidArgument {
            reason: format!("{}: {}", reason.into(), native_error_message(code)),
            code: Some(code),
        }
    }

    /// Create a native failure for `code`.
    pub fn native(code: NativeStatus) -> Self {
        Self::NativeOperationFailed {
            code,
            message: native_error_message(code).to_string(),
        }
    }

    /// Create a missing-queue error.
    pub fn no_queue(device: impl Into<String>) -> Self {
        Self::NoQueue {
            device: device.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Native status code carried by this error, if any.
    pub fn native_code(&self) -> Option<NativeStatus> {
        match self {
            Self::InvalidArgument { code, .. } => *code,
            Self::NativeOperationFailed { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether this error signals a broken invariant in the calling code
    /// rather than an environmental failure.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::DoubleResolution { .. } | Self::DoubleSteal { .. }
        )
    }
}

/// Translate a native status code at a call boundary.
pub fn translate_native_error(code: NativeStatus) -> Result<()> {
    if code == status::SUCCESS {
        Ok(())
    } else {
        Err(CleventError::native(code))
    }
}

/// Human readable name of a native status code.
pub fn native_error_message(code: NativeStatus) -> &'static str {
    match code {
        status::SUCCESS => "CL_SUCCESS",
        status::DEVICE_NOT_FOUND => "CL_DEVICE_NOT_FOUND",
        status::DEVICE_NOT_AVAILABLE => "CL_DEVICE_NOT_AVAILABLE",
        status::COMPILER_NOT_AVAILABLE => "CL_COMPILER_NOT_AVAILABLE",
        status::MEM_OBJECT_ALLOCATION_FAILURE => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
        status::OUT_OF_RESOURCES => "CL_OUT_OF_RESOURCES",
        status::OUT_OF_HOST_MEMORY => "CL_OUT_OF_HOST_MEMORY",
        status::BUILD_PROGRAM_FAILURE => "CL_BUILD_PROGRAM_FAILURE",
        status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST => {
            "CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST"
        }
        status::INVALID_VALUE => "CL_INVALID_VALUE",
        status::INVALID_DEVICE => "CL_INVALID_DEVICE",
        status::INVALID_CONTEXT => "CL_INVALID_CONTEXT",
        status::INVALID_COMMAND_QUEUE => "CL_INVALID_COMMAND_QUEUE",
        status::INVALID_MEM_OBJECT => "CL_INVALID_MEM_OBJECT",
        status::INVALID_PROGRAM => "CL_INVALID_PROGRAM",
        status::INVALID_KERNEL_NAME => "CL_INVALID_KERNEL_NAME",
        status::INVALID_KERNEL => "CL_INVALID_KERNEL",
        status::INVALID_ARG_INDEX => "CL_INVALID_ARG_INDEX",
        status::INVALID_ARG_VALUE => "CL_INVALID_ARG_VALUE",
        status::INVALID_ARG_SIZE => "CL_INVALID_ARG_SIZE",
        status::INVALID_KERNEL_ARGS => "CL_INVALID_KERNEL_ARGS",
        status::INVALID_WORK_DIMENSION => "CL_INVALID_WORK_DIMENSION",
        status::INVALID_WORK_GROUP_SIZE => "CL_INVALID_WORK_GROUP_SIZE",
        status::INVALID_EVENT_WAIT_LIST => "CL_INVALID_EVENT_WAIT_LIST",
        status::INVALID_EVENT => "CL_INVALID_EVENT",
        status::INVALID_OPERATION => "CL_INVALID_OPERATION",
        status::INVALID_BUFFER_SIZE => "CL_INVALID_BUFFER_SIZE",
        status::INVALID_GLOBAL_WORK_SIZE => "CL_INVALID_GLOBAL_WORK_SIZE",
        _ => "unknown native error",
    }
}
