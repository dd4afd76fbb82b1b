//! I2C hardware abstraction trait.

use async_trait::async_trait;
use super::Result;

/// I2C-specific errors
#[derive(Debug, thiserror::Error)]
pub enum I2cError {
    /// No acknowledgment from device
    #[error("No acknowledgment from device at address 0x{0:02x}")]
    NoAck(u8),

    /// Bus arbitration lost
    #[error("Bus arbitration lost")]
    ArbitrationLost,

    /// Bus error
    #[error("Bus error")]
    BusError,

    /// Other I2C error
    #[error("I2C error: {0}")]
    Other(String),
}

/// I2C bus master.
///
/// A `read` that the device does not answer must fail with
/// [`I2cError::NoAck`]; the opcode channel treats that as "no response
/// byte yet" and keeps polling until its deadline.
#[async_trait]
pub trait I2c: Send + Sync {
    /// Bring up the bus (join as master).
    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Write data to an I2C device in a single transaction.
    async fn write(&mut self, addr: u8, data: &[u8]) -> Result<()>;

    /// Read data from an I2C device.
    async fn read(&mut self, addr: u8, buffer: &mut [u8]) -> Result<()>;
}
