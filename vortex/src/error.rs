use std::fmt::Display;

use crate::stream::EventId;

/// Enumeration representing the various errors that can occur within the vortex runtime.
#[derive(Debug)]
pub enum VortexError {
    /// Kernel build/link failed, fatal for that kernel identity
    KernelBuildFailure(BackendError),
    /// Use of a released or foreign device buffer
    InvalidBufferUse(Box<str>),
    /// Wait list referenced an event id that was never issued or is already retired
    UnknownEvent(EventId),
    /// Operation submitted to a stream after cleanup()
    EnqueueAfterCleanup,
    /// Backend cannot honor the requested operation, e.g. a dependency-aware launch
    UnsupportedOperation(Box<str>),
    /// Underlying device transfer reported nonzero status
    NativeTransferFailure(BackendError),
    /// There are no available backends
    NoBackendAvailable,
    /// Error parsing some data
    ParseError(Box<str>),
    /// Error from file operations
    IOError(std::io::Error),
    /// Other error returned by backends
    BackendFailure(BackendError),
}

impl VortexError {
    /// Parse error
    #[track_caller]
    pub fn parse_error(e: Box<str>) -> Self {
        let location = std::panic::Location::caller();
        use std::fmt::Write;
        let mut e: String = e.into();
        write!(e, ", {}:{}:{}", location.file(), location.line(), location.column()).unwrap();
        Self::ParseError(e.into())
    }

    /// Invalid buffer use
    #[track_caller]
    pub fn invalid_buffer(e: Box<str>) -> Self {
        let location = std::panic::Location::caller();
        use std::fmt::Write;
        let mut e: String = e.into();
        write!(e, ", {}:{}:{}", location.file(), location.line(), location.column()).unwrap();
        Self::InvalidBufferUse(e.into())
    }
}

impl Display for VortexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VortexError::KernelBuildFailure(e) => {
                f.write_fmt(format_args!("Kernel build failure {e}"))
            }
            VortexError::InvalidBufferUse(e) => {
                f.write_fmt(format_args!("Invalid buffer use {e}"))
            }
            VortexError::UnknownEvent(e) => {
                f.write_fmt(format_args!("Unknown or retired event {e}"))
            }
            VortexError::EnqueueAfterCleanup => {
                f.write_str("Operation enqueued on a stream after cleanup")
            }
            VortexError::UnsupportedOperation(e) => {
                f.write_fmt(format_args!("Unsupported operation {e}"))
            }
            VortexError::NativeTransferFailure(e) => {
                f.write_fmt(format_args!("Native transfer failure {e}"))
            }
            VortexError::NoBackendAvailable => f.write_str("No available backend"),
            VortexError::ParseError(e) => f.write_fmt(format_args!("Parse {e}")),
            VortexError::IOError(e) => f.write_fmt(format_args!("IO {e}")),
            VortexError::BackendFailure(e) => f.write_fmt(format_args!("Backend {e}")),
        }
    }
}

impl std::error::Error for VortexError {}

impl From<std::io::Error> for VortexError {
    #[track_caller]
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

impl From<BackendError> for VortexError {
    fn from(value: BackendError) -> Self {
        VortexError::BackendFailure(value)
    }
}

/// Error returned by a native backend, native status attached in context
#[derive(Debug)]
pub struct BackendError {
    pub status: ErrorStatus,
    pub context: Box<str>,
}

impl Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:?}: {}", self.status, self.context))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    /// Dynamic library was not found on the disk
    DyLibNotFound,
    /// Backend initialization failure
    Initialization,
    /// Backend deinitialization failure
    Deinitialization,
    /// Failed to enumerate devices
    DeviceEnumeration,
    /// Failed to query device for information
    DeviceQuery,
    /// Failed to allocate memory
    MemoryAllocation,
    /// Failed to deallocate memory
    MemoryDeallocation,
    /// Failed to copy memory to device
    MemoryCopyH2D,
    /// Failed to copy memory to host
    MemoryCopyD2H,
    /// Kernel argument was not correct
    IncorrectKernelArg,
    /// Failed to build kernel
    KernelBuild,
    /// Failed to launch kernel
    KernelLaunch,
    /// Failed to synchronize queue or events
    KernelSync,
}
