//! Common error types for prism-driver.
//!
//! This module provides a centralized Error enum using thiserror, with
//! conversions from the hardware abstraction errors. Every variant maps onto
//! the device's five-value status taxonomy through [`Error::code`].

use thiserror::Error;

use crate::hw_trait::HwError;

/// Status taxonomy shared with the device firmware and the C API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[repr(u8)]
pub enum ErrorCode {
    #[strum(serialize = "OK")]
    Ok = 0,
    #[strum(serialize = "INVALID_ARGUMENT")]
    InvalidArgument = 1,
    #[strum(serialize = "OUT_OF_MEMORY")]
    OutOfMemory = 2,
    #[strum(serialize = "UNSUPPORTED_OPERATION")]
    UnsupportedOperation = 3,
    #[strum(serialize = "UNKNOWN")]
    Unknown = 4,
}

/// Main error type for prism-driver operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Argument rejected before any wire activity
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Reserved by the taxonomy; not raised by the driver
    #[error("Out of memory")]
    OutOfMemory,

    /// Reserved by the taxonomy; not raised by the driver
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// No acknowledgement byte arrived before the deadline
    #[error("Device at 0x{address:02x} not responding")]
    NotResponding { address: u8 },

    /// The acknowledgement byte was not the acceptance value
    #[error("Device at 0x{address:02x} rejected command (response 0x{response:02x})")]
    Rejected { address: u8, response: u8 },

    /// Bus or pin failure on the host side
    #[error("Hardware error: {0}")]
    Hardware(#[from] HwError),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Collapse into the device status taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Error::OutOfMemory => ErrorCode::OutOfMemory,
            Error::UnsupportedOperation(_) => ErrorCode::UnsupportedOperation,
            Error::NotResponding { .. } | Error::Rejected { .. } | Error::Hardware(_) => {
                ErrorCode::Unknown
            }
        }
    }
}

/// Status code of an operation result, `Ok` on success.
pub fn status_of<T>(result: &Result<T>) -> ErrorCode {
    match result {
        Ok(_) => ErrorCode::Ok,
        Err(e) => e.code(),
    }
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
