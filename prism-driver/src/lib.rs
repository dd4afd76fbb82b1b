//! Host driver for the Prism 256-bit vector coprocessor.
//!
//! [`Prism`] drives one device through three collaborators supplied by the
//! caller: an [`hw_trait::I2c`] master for commands, an [`hw_trait::Gpio`]
//! controller for the parallel data bus, and an [`hw_trait::Delay`]. The
//! [`sim`] module provides in-process implementations of both transports
//! backed by a simulated device.

pub mod config;
pub mod error;
pub mod hw_trait;
pub mod prism;
pub mod sim;
pub mod tracing;

pub use error::{Error, ErrorCode, Result};
pub use prism::{
    Bank, Command, Compare, DeviceInfo, ElementType, LaneCount, LaneOp, Prism, ShiftDirection,
    V256, PROTOCOL_VERSION,
};
