//! Kernel error types
//!
//! Proper error types for the memory-management core, replacing string
//! literals with structured variants where the information is known at the
//! call site.

use core::fmt;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// A physical frame, ASA range, or heap allocation could not be
    /// satisfied.
    OutOfMemory { requested: usize, available: usize },
    /// An address argument was malformed (unaligned, out of range, etc).
    InvalidAddress { addr: usize },
    /// Operation targeted an address with no live mapping/allocation.
    UnmappedMemory { addr: usize },
    /// A caller-supplied argument violated a precondition.
    InvalidArgument {
        name: &'static str,
        value: &'static str,
    },
    /// Subsystem accessed before its init() completed.
    NotInitialized { subsystem: &'static str },
    /// Underlying hardware reported a failure.
    HardwareError { device: &'static str, code: u32 },
    /// Legacy string error for gradual migration from &'static str patterns.
    LegacyError { message: &'static str },
}

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
            Self::InvalidArgument { name, value } => {
                write!(f, "invalid argument '{}': {}", name, value)
            }
            Self::NotInitialized { subsystem } => {
                write!(f, "subsystem not initialized: {}", subsystem)
            }
            Self::HardwareError { device, code } => {
                write!(f, "hardware error on {}: code 0x{:x}", device, code)
            }
            Self::LegacyError { message } => write!(f, "{}", message),
        }
    }
}

/// Conversion from legacy &'static str errors to KernelError.
///
/// Enables gradual migration: functions returning Result<T, &'static str>
/// can be called with `?` from functions returning Result<T, KernelError>.
impl From<&'static str> for KernelError {
    fn from(msg: &'static str) -> Self {
        Self::LegacyError { message: msg }
    }
}

#[macro_export]
macro_rules! kernel_error {
    (OutOfMemory { requested: $req:expr, available: $avail:expr }) => {
        $crate::error::KernelError::OutOfMemory {
            requested: $req,
            available: $avail,
        }
    };
    (InvalidAddress { $addr:expr }) => {
        $crate::error::KernelError::InvalidAddress { addr: $addr }
    };
    (InvalidArgument { $name:expr => $value:expr }) => {
        $crate::error::KernelError::InvalidArgument {
            name: $name,
            value: $value,
        }
    };
    ($variant:ident) => {
        $crate::error::KernelError::$variant
    };
}
