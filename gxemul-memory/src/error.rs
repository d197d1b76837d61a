//! Error Handling Module
//!
//! Errors a guest memory object can report on its own (host resource
//! exhaustion, bad configuration). Guest-visible faults (TLB miss, bus
//! error, ...) are not represented here: per the error taxonomy, those are
//! reported by the caller mutating CPU exception state and are not Rust
//! errors at this layer.

use thiserror_no_std::Error;

/// Errors that can occur while constructing or configuring guest memory.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// A device was registered with a range that overlaps an existing one.
    #[error("device range overlaps an already registered device")]
    OverlappingDevice,

    /// The host ran out of memory while lazily backing a RAM block.
    #[error("host allocation failed while backing guest RAM")]
    HostAllocationFailed,
}

/// A type alias for `Result<T, MemoryError>`.
pub type Result<T> = core::result::Result<T, MemoryError>;

/// The outcome of a single `access_physical` call that the guest should
/// observe as a fault. This is not a host error: it is the `FAILED` result
/// named throughout the memory access contract, and the caller is
/// responsible for delivering the corresponding guest exception unless
/// `NO_EXCEPTIONS` was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessFault {
    /// The device at this address rejected the access.
    DeviceError,
    /// The address falls outside of the configured physical address space
    /// and the access was not a probe.
    OutOfRange,
}
