//! I2C control channel.
//!
//! Every command is one 8-byte write followed by a one-byte acknowledgement
//! read. The acknowledgement only proves the device accepted the command;
//! it says nothing about data moved over the parallel bus.

use std::time::Duration;
use tokio::time::{self, Instant};

use crate::config::Timing;
use crate::error::{Error, Result};
use crate::hw_trait::{Delay, I2c};
use crate::tracing::prelude::*;

use super::protocol::{types, Command, ACK, NO_ARG};

/// Control channel to one device address.
pub struct OpcodeChannel<I2C, D> {
    i2c: I2C,
    delay: D,
    address: u8,
    timing: Timing,
}

impl<I2C: I2c, D: Delay> OpcodeChannel<I2C, D> {
    pub fn new(i2c: I2C, delay: D, address: u8, timing: Timing) -> Self {
        Self {
            i2c,
            delay,
            address,
            timing,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Join the I2C bus as master.
    pub async fn init_bus(&mut self) -> crate::hw_trait::Result<()> {
        self.i2c.init().await
    }

    /// Send an opcode that takes no argument.
    ///
    /// Rejects a zero opcode or type tag before touching the bus.
    pub async fn send_opcode(&mut self, op: u16, ty: u8, timeout: u32) -> Result<()> {
        if op == 0 {
            return Err(Error::invalid("opcode 0"));
        }
        if ty == 0 {
            return Err(Error::invalid("type tag 0"));
        }
        self.send_opcode_with_arg(op, ty, NO_ARG, timeout).await
    }

    /// Send an opcode with a one-byte argument.
    pub async fn send_opcode_with_arg(
        &mut self,
        op: u16,
        ty: u8,
        arg: u8,
        timeout: u32,
    ) -> Result<()> {
        self.send(Command::new(op, arg, ty, timeout)).await
    }

    /// Write a command and wait for its acknowledgement.
    ///
    /// `command.timeout` (ms) bounds the whole exchange: after the settle
    /// delay the channel polls for the response byte until the deadline,
    /// always reading at least once. Dropping the future abandons the wait.
    pub async fn send(&mut self, command: Command) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(command.timeout as u64);

        let packet = command.to_bytes();
        trace!(
            "TX 0x{:02x}: op=0x{:02x} arg=0x{:02x} type=0x{:02x} timeout={}ms [{}]",
            self.address,
            command.op,
            command.arg,
            command.ty,
            command.timeout,
            hex::encode(&packet)
        );
        self.i2c.write(self.address, &packet).await?;

        self.delay.delay_ms(self.timing.settle_ms).await;

        // First read happens even when the deadline has already passed
        if let Some(response) = self.read_response().await? {
            return self.check_response(&command, response);
        }

        let address = self.address;
        let poll_ms = self.timing.poll_interval_ms.max(1);
        let response = time::timeout_at(deadline, async {
            loop {
                self.delay.delay_ms(poll_ms).await;
                if let Some(response) = self.read_response().await? {
                    return Ok::<u8, Error>(response);
                }
            }
        })
        .await
        .map_err(|_| {
            debug!(
                "Device 0x{:02x} silent for op 0x{:02x} after {}ms",
                address, command.op, command.timeout
            );
            Error::NotResponding { address }
        })??;

        self.check_response(&command, response)
    }

    fn check_response(&self, command: &Command, response: u8) -> Result<()> {
        if response == ACK {
            trace!("RX 0x{:02x}: ack", self.address);
            return Ok(());
        }
        debug!(
            "Device 0x{:02x} rejected op 0x{:02x} with 0x{:02x}",
            self.address, command.op, response
        );
        Err(Error::Rejected {
            address: self.address,
            response,
        })
    }

    /// Read a one-byte device variable.
    ///
    /// Best effort: a failed write or a silent device yields `None`.
    pub async fn query(&mut self, op: u16) -> Option<u8> {
        let command = Command::new(op, 0, types::UI8, u16::MAX as u32);
        let packet = command.to_bytes();
        trace!("TX 0x{:02x}: query 0x{:02x} [{}]", self.address, op, hex::encode(&packet));

        if let Err(e) = self.i2c.write(self.address, &packet).await {
            debug!("Query 0x{:02x} write failed: {}", op, e);
        }

        self.delay.delay_ms(self.timing.settle_ms).await;

        match self.read_response().await {
            Ok(Some(value)) => {
                trace!("RX 0x{:02x}: 0x{:02x}", self.address, value);
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                debug!("Query 0x{:02x} read failed: {}", op, e);
                None
            }
        }
    }

    // One response byte, or None when the device does not answer the read.
    async fn read_response(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.i2c.read(self.address, &mut buf).await {
            Ok(()) => Ok(Some(buf[0])),
            Err(e) if e.is_no_ack() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
