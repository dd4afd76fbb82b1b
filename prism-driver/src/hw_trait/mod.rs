//! Hardware abstraction layer traits.
//!
//! This module defines the hardware interface traits (I2C, GPIO, delay) that
//! let the Prism driver run over different underlying implementations,
//! whether direct microcontroller pins, a Linux host adapter, or the
//! in-process simulator in [`crate::sim`].

pub mod delay;
pub mod gpio;
pub mod i2c;

// Re-export traits
pub use delay::{Delay, TokioDelay};
pub use gpio::{Gpio, PinMode, PinValue};
pub use i2c::{I2c, I2cError};

/// Common error type for hardware operations
#[derive(Debug, thiserror::Error)]
pub enum HwError {
    /// I/O error from underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I2C bus error
    #[error(transparent)]
    I2c(#[from] I2cError),

    /// Pin number the controller does not have
    #[error("Invalid pin: {0}")]
    InvalidPin(u8),

    /// Other hardware-specific error
    #[error("Hardware error: {0}")]
    Other(String),
}

impl HwError {
    /// True when the addressed I2C device did not acknowledge.
    pub fn is_no_ack(&self) -> bool {
        matches!(self, HwError::I2c(I2cError::NoAck(_)))
    }
}

pub type Result<T> = std::result::Result<T, HwError>;
