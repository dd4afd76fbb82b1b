//! Typed vector operations.
//!
//! Each family has one generic entry point that validates its arguments
//! once, before any wire activity, and then sends a single command. The
//! named methods are thin forwarders. Operands are banks A and B, the
//! result lands in bank C.

use crate::error::{Error, Result};
use crate::hw_trait::{Delay, Gpio, I2c};
use crate::tracing::prelude::*;

use super::protocol::{
    opcodes, types, Bank, Command, Compare, ElementType, LaneCount, LaneOp, ShiftDirection,
};
use super::Prism;

macro_rules! lane_ops {
    ($($(#[$doc:meta])* $name:ident => $kind:ident;)*) => {
        $(
            $(#[$doc])*
            pub async fn $name(&mut self, lanes: u8, ty: ElementType, timeout: u32) -> Result<()> {
                self.lane_op(LaneOp::$kind, lanes, ty, timeout).await
            }
        )*
    };
}

impl<I2C: I2c, G: Gpio, D: Delay + Clone> Prism<I2C, G, D> {
    /// Run an arithmetic or logic operation over the first `lanes` 32-bit
    /// lanes, interpreting them as `ty` elements.
    pub async fn lane_op(
        &mut self,
        kind: LaneOp,
        lanes: u8,
        ty: ElementType,
        timeout: u32,
    ) -> Result<()> {
        let lanes = LaneCount::new(lanes)?;
        trace!("{} x{} {}", kind, lanes.get(), ty);
        self.channel
            .send(Command::lane_op(kind, lanes, ty, timeout))
            .await
    }

    lane_ops! {
        /// C = A + B
        add => Add;
        /// C = A - B
        sub => Sub;
        /// C = A * B
        mul => Mul;
        /// C = A / B
        div => Div;
        and => And;
        nand => Nand;
        or => Or;
        xor => Xor;
        nor => Nor;
        /// C = !A
        not => Not;
    }

    /// Invert bank C in place.
    pub async fn notc(&mut self, lanes: u8, ty: ElementType, timeout: u32) -> Result<()> {
        LaneCount::new(lanes)?;
        self.channel
            .send_opcode(opcodes::NOTC, ty.tag(), timeout)
            .await
    }

    /// Lane-wise comparison of A and B; C gets all-ones where it holds.
    pub async fn compare(&mut self, cmp: Compare, lanes: u8, timeout: u32) -> Result<()> {
        LaneCount::new(lanes)?;
        self.channel
            .send_opcode(cmp.opcode(), types::UI32, timeout)
            .await
    }

    /// C = two's complement of A.
    pub async fn complement(&mut self, lanes: u8, timeout: u32) -> Result<()> {
        LaneCount::new(lanes)?;
        self.channel
            .send_opcode(opcodes::CPL2, types::UI32, timeout)
            .await
    }

    /// Shift each lane of A by `amount` bits into C.
    pub async fn shift(
        &mut self,
        dir: ShiftDirection,
        lanes: u8,
        amount: u8,
        timeout: u32,
    ) -> Result<()> {
        LaneCount::new(lanes)?;
        self.channel
            .send_opcode_with_arg(dir.opcode(), types::UI32, amount, timeout)
            .await
    }

    pub async fn shift_left(&mut self, lanes: u8, amount: u8, timeout: u32) -> Result<()> {
        self.shift(ShiftDirection::Left, lanes, amount, timeout).await
    }

    pub async fn shift_right(&mut self, lanes: u8, amount: u8, timeout: u32) -> Result<()> {
        self.shift(ShiftDirection::Right, lanes, amount, timeout).await
    }

    pub async fn copy_c_to_a(&mut self, timeout: u32) -> Result<()> {
        self.control(opcodes::CTOA, timeout).await
    }

    pub async fn copy_c_to_b(&mut self, timeout: u32) -> Result<()> {
        self.control(opcodes::CTOB, timeout).await
    }

    /// Whether the device zeroes A and B after every operation.
    pub async fn set_clear_after_op(&mut self, enabled: bool, timeout: u32) -> Result<()> {
        let op = if enabled {
            opcodes::CLEAR_AFTEROP
        } else {
            opcodes::NOCLEAR_AFTEROP
        };
        self.control(op, timeout).await
    }

    /// Zero bank C or D.
    pub async fn clear_bank(&mut self, bank: Bank, timeout: u32) -> Result<()> {
        let op = match bank {
            Bank::C => opcodes::CLEAR_C,
            Bank::D => opcodes::CLEAR_D,
            Bank::A | Bank::B => {
                return Err(Error::invalid(format!("bank {} cannot be cleared alone", bank)))
            }
        };
        self.control(op, timeout).await
    }

    /// Zero all four banks.
    pub async fn clear_all(&mut self, timeout: u32) -> Result<()> {
        self.control(opcodes::CLEAR_ALL, timeout).await
    }

    async fn control(&mut self, op: u16, timeout: u32) -> Result<()> {
        self.channel.send_opcode(op, types::UI32, timeout).await
    }
}
