//! Prism wire protocol definitions.
//!
//! Opcode and type-tag catalog, the typed operation families built on top of
//! it, and the 8-byte I2C command packet with its codec.
//!
//! Arithmetic and logic opcodes follow protocol revision 1: each operation
//! has one fixed opcode and the lane count travels in the argument byte as
//! `lanes % 8` (so 8 lanes is sent as 0).

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use strum::{Display, EnumIter};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, Result};

/// Opcode catalog
pub mod opcodes {
    // Architecture control
    pub const ARCH_INIT: u16 = 0x00;
    pub const ARCH_GET_FLANK: u16 = 0x01;
    pub const ARCH_GET_VERSION_MAJOR: u16 = 0x02;
    pub const ARCH_GET_VERSION_MINOR: u16 = 0x03;
    pub const ARCH_GET_VERSION_PATCH: u16 = 0x04;
    pub const ARCH_RESET: u16 = 0x05;
    pub const ARCH_END: u16 = 0x06;

    // Lane operations, lane count in the argument byte
    pub const ADD_N: u16 = 0x21;
    pub const SUB_N: u16 = 0x22;
    pub const MUL_N: u16 = 0x23;
    pub const DIV_N: u16 = 0x24;
    pub const AND_N: u16 = 0x25;
    pub const NAND_N: u16 = 0x26;
    pub const OR_N: u16 = 0x27;
    pub const XOR_N: u16 = 0x28;
    pub const NOR_N: u16 = 0x29;
    pub const NOT_N: u16 = 0x2A;

    pub const NOTC: u16 = 0x2B;
    pub const CTOB: u16 = 0x2C; // bank C -> bank B
    pub const CTOA: u16 = 0x2D; // bank C -> bank A

    // Bank transfers
    pub const STORE_A: u16 = 0x58;
    pub const STORE_B: u16 = 0x59;
    pub const LOAD_C: u16 = 0x5A;
    pub const LOAD_D: u16 = 0x5B;
    pub const LOAD_A: u16 = 0x5C;
    pub const LOAD_B: u16 = 0x5D;

    /// Closes a STORE/LOAD frame
    pub const END: u16 = 0x5F;

    pub const NOCLEAR_AFTEROP: u16 = 0x60;
    pub const CLEAR_AFTEROP: u16 = 0x61;
    pub const CLEAR_C: u16 = 0x62;
    pub const CLEAR_D: u16 = 0x63;
    pub const CLEAR_ALL: u16 = 0x64;

    pub const CMP_EQ: u16 = 0x70;
    pub const CMP_NE: u16 = 0x71;
    pub const CMP_GT: u16 = 0x72;
    pub const CMP_GE: u16 = 0x73;
    pub const CMP_LT: u16 = 0x74;
    pub const CMP_LE: u16 = 0x75;
    pub const CPL2: u16 = 0x76;

    pub const SHIFT_L: u16 = 0x77;
    pub const SHIFT_R: u16 = 0x78;
}

/// Element type tags
pub mod types {
    pub const UI32: u8 = 0xD0;
    pub const SI32: u8 = 0xD1;
    pub const UI16: u8 = 0xD2;
    pub const SI16: u8 = 0xD3;
    pub const UI8: u8 = 0xD4;
    pub const SI8: u8 = 0xD5;

    // Reserved by the firmware; no operation in this driver emits them.
    #[cfg(feature = "wide-types")]
    pub const UI4: u8 = 0xDF;
    #[cfg(feature = "wide-types")]
    pub const SI4: u8 = 0xDE;
    #[cfg(feature = "wide-types")]
    pub const UI64: u8 = 0xC0;
    #[cfg(feature = "wide-types")]
    pub const UI128: u8 = 0xC2;
    #[cfg(feature = "wide-types")]
    pub const UI256: u8 = 0xC4;
    #[cfg(feature = "wide-types")]
    pub const FL: u8 = 0xF0;
    #[cfg(feature = "wide-types")]
    pub const HF: u8 = 0xF1;
    #[cfg(feature = "wide-types")]
    pub const END: u8 = 0xFF;
}

/// Response byte meaning "command accepted".
pub const ACK: u8 = 0x01;

/// Argument byte sent when an opcode takes no argument.
pub const NO_ARG: u8 = 0xFF;

/// Encoded size of a [`Command`].
pub const COMMAND_LEN: usize = 8;

/// Lanes in a 256-bit vector.
pub const LANES: usize = 8;

/// Element interpretation of the 256-bit registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display)]
pub enum ElementType {
    #[strum(serialize = "ui32")]
    U32,
    #[strum(serialize = "si32")]
    I32,
    #[strum(serialize = "ui16")]
    U16,
    #[strum(serialize = "si16")]
    I16,
    #[strum(serialize = "ui8")]
    U8,
    #[strum(serialize = "si8")]
    I8,
}

impl ElementType {
    pub fn tag(self) -> u8 {
        match self {
            ElementType::U32 => types::UI32,
            ElementType::I32 => types::SI32,
            ElementType::U16 => types::UI16,
            ElementType::I16 => types::SI16,
            ElementType::U8 => types::UI8,
            ElementType::I8 => types::SI8,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            types::UI32 => Some(ElementType::U32),
            types::SI32 => Some(ElementType::I32),
            types::UI16 => Some(ElementType::U16),
            types::SI16 => Some(ElementType::I16),
            types::UI8 => Some(ElementType::U8),
            types::SI8 => Some(ElementType::I8),
            _ => None,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, ElementType::I32 | ElementType::I16 | ElementType::I8)
    }

    /// Width of one element in bits.
    pub fn bits(self) -> u32 {
        match self {
            ElementType::U32 | ElementType::I32 => 32,
            ElementType::U16 | ElementType::I16 => 16,
            ElementType::U8 | ElementType::I8 => 8,
        }
    }
}

/// Arithmetic and logic operations that take a lane count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display)]
#[strum(serialize_all = "lowercase")]
pub enum LaneOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Nand,
    Or,
    Xor,
    Nor,
    Not,
}

impl LaneOp {
    pub fn opcode(self) -> u16 {
        match self {
            LaneOp::Add => opcodes::ADD_N,
            LaneOp::Sub => opcodes::SUB_N,
            LaneOp::Mul => opcodes::MUL_N,
            LaneOp::Div => opcodes::DIV_N,
            LaneOp::And => opcodes::AND_N,
            LaneOp::Nand => opcodes::NAND_N,
            LaneOp::Or => opcodes::OR_N,
            LaneOp::Xor => opcodes::XOR_N,
            LaneOp::Nor => opcodes::NOR_N,
            LaneOp::Not => opcodes::NOT_N,
        }
    }

    pub fn from_opcode(op: u16) -> Option<Self> {
        use strum::IntoEnumIterator;
        LaneOp::iter().find(|kind| kind.opcode() == op)
    }
}

/// Lane-wise comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Compare {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Compare {
    pub fn opcode(self) -> u16 {
        match self {
            Compare::Eq => opcodes::CMP_EQ,
            Compare::Ne => opcodes::CMP_NE,
            Compare::Gt => opcodes::CMP_GT,
            Compare::Ge => opcodes::CMP_GE,
            Compare::Lt => opcodes::CMP_LT,
            Compare::Le => opcodes::CMP_LE,
        }
    }

    pub fn from_opcode(op: u16) -> Option<Self> {
        use strum::IntoEnumIterator;
        Compare::iter().find(|cmp| cmp.opcode() == op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ShiftDirection {
    Left,
    Right,
}

impl ShiftDirection {
    pub fn opcode(self) -> u16 {
        match self {
            ShiftDirection::Left => opcodes::SHIFT_L,
            ShiftDirection::Right => opcodes::SHIFT_R,
        }
    }
}

/// Number of 32-bit lanes an operation covers, always 1..=8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaneCount(u8);

impl LaneCount {
    pub const ALL: LaneCount = LaneCount(8);

    pub fn new(lanes: u8) -> Result<Self> {
        if !(1..=LANES as u8).contains(&lanes) {
            return Err(Error::invalid(format!("lane count {} not in 1..=8", lanes)));
        }
        Ok(LaneCount(lanes))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Argument byte encoding: 8 lanes wrap to 0.
    pub fn wire_arg(self) -> u8 {
        self.0 % LANES as u8
    }

    /// Inverse of [`LaneCount::wire_arg`].
    pub fn from_wire_arg(arg: u8) -> Result<Self> {
        match arg {
            0 => Ok(LaneCount::ALL),
            n => LaneCount::new(n),
        }
    }
}

/// Register banks on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display)]
pub enum Bank {
    A = 0,
    B = 1,
    C = 2,
    D = 3,
}

impl TryFrom<u8> for Bank {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Bank::A),
            1 => Ok(Bank::B),
            2 => Ok(Bank::C),
            3 => Ok(Bank::D),
            _ => Err(Error::invalid(format!("bank {} does not exist", value))),
        }
    }
}

impl Bank {
    /// STORE opcode, or `None` for banks the host cannot write.
    pub fn store_opcode(self) -> Option<u16> {
        match self {
            Bank::A => Some(opcodes::STORE_A),
            Bank::B => Some(opcodes::STORE_B),
            Bank::C | Bank::D => None,
        }
    }

    pub fn load_opcode(self) -> u16 {
        match self {
            Bank::A => opcodes::LOAD_A,
            Bank::B => opcodes::LOAD_B,
            Bank::C => opcodes::LOAD_C,
            Bank::D => opcodes::LOAD_D,
        }
    }

    pub fn is_store_target(self) -> bool {
        self.store_opcode().is_some()
    }
}

/// One control-channel command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub op: u16,
    pub arg: u8,
    pub ty: u8,
    /// Milliseconds
    pub timeout: u32,
}

impl Command {
    /// Fields in wire order.
    pub fn new(op: u16, arg: u8, ty: u8, timeout: u32) -> Self {
        Self { op, arg, ty, timeout }
    }

    /// Command without an argument.
    pub fn bare(op: u16, ty: u8, timeout: u32) -> Self {
        Self::new(op, NO_ARG, ty, timeout)
    }

    pub fn lane_op(kind: LaneOp, lanes: LaneCount, ty: ElementType, timeout: u32) -> Self {
        Self::new(kind.opcode(), lanes.wire_arg(), ty.tag(), timeout)
    }

    /// Encode into a fresh 8-byte buffer.
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(COMMAND_LEN);
        self.put(&mut buf);
        buf
    }

    fn put(&self, dst: &mut BytesMut) {
        dst.put_u16_le(self.op);
        dst.put_u8(self.arg);
        dst.put_u8(self.ty);
        dst.put_u32_le(self.timeout);
    }
}

/// Codec for the 8-byte command packet.
#[derive(Debug, Default)]
pub struct CommandCodec;

impl Encoder<Command> for CommandCodec {
    type Error = io::Error;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        dst.reserve(COMMAND_LEN);
        command.put(dst);
        Ok(())
    }
}

impl Decoder for CommandCodec {
    type Item = Command;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Command>, Self::Error> {
        if src.len() < COMMAND_LEN {
            return Ok(None);
        }
        let op = src.get_u16_le();
        let arg = src.get_u8();
        let ty = src.get_u8();
        let timeout = src.get_u32_le();
        Ok(Some(Command { op, arg, ty, timeout }))
    }
}
