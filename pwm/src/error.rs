//! Error types shared by the PWM core and controller drivers.

use core::fmt;

/// Errors reported by the PWM abstraction and by controller drivers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// A required resource (clock, register region) could not be acquired.
    ResourceUnavailable,
    /// The device description is invalid or unsupported (missing property,
    /// out-of-range clock rate, bad channel index).
    InvalidConfiguration,
    /// The combined chip/driver-state block could not be allocated.
    AllocationFailure,
    /// A waveform translation was attempted while the reference clock
    /// reports a zero rate.
    ClockNotReady,
    /// Register access was attempted after the device lost its binding.
    Unbound,
    /// A register access failed, typically because the mapping was torn
    /// down mid-sequence.
    IoFault,
    /// A chip with the same identity is already registered.
    AlreadyRegistered,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::ResourceUnavailable => "resource unavailable",
            Error::InvalidConfiguration => "invalid device configuration",
            Error::AllocationFailure => "allocation failure",
            Error::ClockNotReady => "clock not ready",
            Error::Unbound => "device not bound",
            Error::IoFault => "register access fault",
            Error::AlreadyRegistered => "chip already registered",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for Error {}

/// Result type used throughout the PWM subsystem.
pub type Result<T, E = Error> = core::result::Result<T, E>;
