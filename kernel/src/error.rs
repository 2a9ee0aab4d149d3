//! Centralized error types for the kernel.
//!
//! Every fallible kernel-internal boundary (memory allocation, scheduler
//! state transitions, syscall argument validation, file-system operations)
//! returns `KernelResult<T>`. Invariant violations are not modeled as
//! `Result` values — see `kernel_assert!` — because a violated invariant is
//! not recoverable.

use core::fmt;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    OutOfMemory {
        requested: usize,
        available: usize,
    },
    InvalidAddress {
        addr: usize,
    },
    UnmappedMemory {
        addr: usize,
    },
    ProcessNotFound {
        pid: u32,
    },
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    SchedulerError(SchedError),
    SyscallError(SyscallError),
    FsError(FsError),
    HardwareError {
        device: &'static str,
        code: u32,
    },
    InvalidArgument {
        name: &'static str,
        value: &'static str,
    },
    ResourceExhausted {
        resource: &'static str,
    },
    PermissionDenied {
        operation: &'static str,
    },
    AlreadyExists {
        resource: &'static str,
    },
    NotFound {
        resource: &'static str,
    },
    Timeout {
        operation: &'static str,
        duration_ms: u64,
    },
    NotImplemented {
        feature: &'static str,
    },
    WouldBlock,
    NotInitialized {
        subsystem: &'static str,
    },
}

/// Scheduler-specific errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    InvalidPriority { priority: u8 },
    TaskNotFound { pid: u32 },
    InvariantViolation { what: &'static str },
    ReadyListEmpty,
}

/// System-call dispatch errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscall { nr: usize },
    InvalidArgument { arg: usize },
    BadAddress { addr: usize },
    BadFileDescriptor { fd: i32 },
}

/// Filesystem-specific errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    AlreadyExists,
    NotADirectory,
    NotAFile,
    IsADirectory,
    InvalidPath,
    NoRootFs,
    IoError,
    DirectoryNotEmpty,
    TooManyOpenFiles,
    BadFileDescriptor,
    NotSupported,
    FileTooLarge,
    FileInUse,
    WriteDenied,
    NoSpace,
    NotMounted,
}

/// Result type alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "out of memory: requested {} bytes, {} available",
                requested, available
            ),
            Self::InvalidAddress { addr } => write!(f, "invalid address: 0x{:x}", addr),
            Self::UnmappedMemory { addr } => write!(f, "unmapped memory at 0x{:x}", addr),
            Self::ProcessNotFound { pid } => write!(f, "process {} not found", pid),
            Self::InvalidState { expected, actual } => {
                write!(f, "invalid state: expected {}, got {}", expected, actual)
            }
            Self::SchedulerError(e) => write!(f, "scheduler error: {:?}", e),
            Self::SyscallError(e) => write!(f, "syscall error: {:?}", e),
            Self::FsError(e) => write!(f, "filesystem error: {:?}", e),
            Self::HardwareError { device, code } => {
                write!(f, "hardware error on {}: code 0x{:x}", device, code)
            }
            Self::InvalidArgument { name, value } => {
                write!(f, "invalid argument '{}': {}", name, value)
            }
            Self::ResourceExhausted { resource } => write!(f, "resource exhausted: {}", resource),
            Self::PermissionDenied { operation } => {
                write!(f, "permission denied for operation: {}", operation)
            }
            Self::AlreadyExists { resource } => write!(f, "{} already exists", resource),
            Self::NotFound { resource } => write!(f, "{} not found", resource),
            Self::Timeout {
                operation,
                duration_ms,
            } => write!(f, "timeout during {}: {} ms", operation, duration_ms),
            Self::NotImplemented { feature } => write!(f, "not implemented: {}", feature),
            Self::WouldBlock => write!(f, "operation would block"),
            Self::NotInitialized { subsystem } => {
                write!(f, "subsystem not initialized: {}", subsystem)
            }
        }
    }
}

impl From<SchedError> for KernelError {
    fn from(err: SchedError) -> Self {
        Self::SchedulerError(err)
    }
}

impl From<SyscallError> for KernelError {
    fn from(err: SyscallError) -> Self {
        Self::SyscallError(err)
    }
}

impl From<FsError> for KernelError {
    fn from(err: FsError) -> Self {
        Self::FsError(err)
    }
}

/// Maps a [`KernelError`] onto the syscall ABI's `-1`-and-diagnostic
/// convention (§7 propagation policy).
pub fn to_syscall_return(err: KernelError) -> isize {
    log::warn!("syscall failed: {}", err);
    -1
}
