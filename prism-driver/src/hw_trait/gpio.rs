//! GPIO hardware abstraction trait.

use async_trait::async_trait;
use super::Result;

/// Pin direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

/// Logic level of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinValue {
    Low,
    High,
}

impl PinValue {
    pub fn is_high(self) -> bool {
        self == PinValue::High
    }
}

impl From<bool> for PinValue {
    fn from(high: bool) -> Self {
        if high {
            PinValue::High
        } else {
            PinValue::Low
        }
    }
}

/// GPIO controller addressed by pin number.
#[async_trait]
pub trait Gpio: Send + Sync {
    /// Configure a pin as input or output.
    async fn set_mode(&mut self, pin: u8, mode: PinMode) -> Result<()>;

    /// Drive an output pin.
    async fn write(&mut self, pin: u8, value: PinValue) -> Result<()>;

    /// Sample a pin.
    async fn read(&mut self, pin: u8) -> Result<PinValue>;
}
