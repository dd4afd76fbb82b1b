//! Simulated Prism device.
//!
//! An in-process stand-in for the coprocessor that speaks both halves of the
//! wire protocol. [`SimDevice::i2c`] and [`SimDevice::gpio`] hand out
//! transport handles sharing one device state, so a [`crate::Prism`] built
//! on them behaves as if wired to real hardware: command packets are
//! decoded and acknowledged, words are assembled on clock falling edges
//! honoring the entry flag, and loads present bank bytes on the data lines.
//!
//! Lane operations execute against banks A and B with the result in bank C.
//! Every I2C write and pin write is recorded for inspection.

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::codec::Decoder;

use crate::config::PinConfig;
use crate::hw_trait::{Gpio, HwError, I2c, I2cError, PinMode, PinValue, Result};
use crate::prism::protocol::{
    opcodes, Bank, Command, CommandCodec, Compare, ElementType, LaneCount, LaneOp, ACK,
    COMMAND_LEN, LANES,
};
use crate::prism::vector::V256;
use crate::tracing::prelude::*;

/// Response byte the simulator sends for commands it cannot execute.
pub const NAK: u8 = 0x00;

/// How the simulated device answers acknowledgement reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behavior {
    /// Execute commands and answer normally
    #[default]
    Normal,
    /// Never answer reads
    Silent,
    /// Execute commands but answer every acknowledgement with this byte
    Respond(u8),
    /// Answer normally after ignoring this many reads per command
    Slow { polls: u32 },
}

/// One recorded pin write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinEvent {
    pub pin: u8,
    pub value: PinValue,
}

/// State of the bus lines at a clock falling edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strobe {
    /// Entry flag level
    pub entry: bool,
    /// Data line levels as driven by the host
    pub data: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Idle,
    Store(Bank),
    Load(Bank),
}

#[derive(Debug)]
struct SimState {
    address: u8,
    behavior: Behavior,
    pending: Option<u8>,
    polls_left: u32,
    refused: Vec<u16>,

    banks: [V256; 4],
    clear_after_op: bool,
    flank: u8,
    version: (u8, u8, u8),

    frame: Frame,
    lane: usize,
    byte_index: usize,
    word: [u8; 4],
    driven: Option<u8>,

    pins: PinConfig,
    levels: HashMap<u8, PinValue>,
    modes: HashMap<u8, PinMode>,

    commands: Vec<Command>,
    i2c_writes: usize,
    i2c_reads: usize,
    pin_log: Vec<PinEvent>,
    strobes: Vec<Strobe>,
}

/// Handle to a simulated device. Cloning shares the device.
#[derive(Clone)]
pub struct SimDevice {
    state: Arc<Mutex<SimState>>,
}

impl SimDevice {
    pub fn new(address: u8) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                address,
                behavior: Behavior::Normal,
                pending: None,
                polls_left: 0,
                refused: Vec::new(),
                banks: [V256::ZERO; 4],
                clear_after_op: false,
                flank: 0,
                version: (0, 0, 0),
                frame: Frame::Idle,
                lane: 0,
                byte_index: 0,
                word: [0; 4],
                driven: None,
                pins: PinConfig::default(),
                levels: HashMap::new(),
                modes: HashMap::new(),
                commands: Vec::new(),
                i2c_writes: 0,
                i2c_reads: 0,
                pin_log: Vec::new(),
                strobes: Vec::new(),
            })),
        }
    }

    /// I2C master attached to this device.
    pub fn i2c(&self) -> SimI2c {
        SimI2c {
            state: self.state.clone(),
        }
    }

    /// GPIO controller wired to this device with the given pin mapping.
    pub fn gpio(&self, pins: PinConfig) -> SimGpio {
        self.state.lock().pins = pins;
        SimGpio {
            state: self.state.clone(),
        }
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        self.state.lock().behavior = behavior;
    }

    /// Answer every later `op` with [`NAK`] without executing it.
    pub fn refuse(&self, op: u16) {
        self.state.lock().refused.push(op);
    }

    /// Values reported by the ARCH_GET_* queries.
    pub fn set_info(&self, flank: u8, version: (u8, u8, u8)) {
        let mut state = self.state.lock();
        state.flank = flank;
        state.version = version;
    }

    pub fn bank(&self, bank: Bank) -> V256 {
        self.state.lock().banks[bank as usize]
    }

    pub fn set_bank(&self, bank: Bank, value: V256) {
        self.state.lock().banks[bank as usize] = value;
    }

    /// Start serving `bank` on the data lines without a LOAD command.
    pub fn begin_load(&self, bank: Bank) {
        self.state.lock().open_frame(Frame::Load(bank));
    }

    pub fn clear_after_op(&self) -> bool {
        self.state.lock().clear_after_op
    }

    /// Commands received, in order.
    pub fn commands(&self) -> Vec<Command> {
        self.state.lock().commands.clone()
    }

    pub fn i2c_writes(&self) -> usize {
        self.state.lock().i2c_writes
    }

    pub fn i2c_reads(&self) -> usize {
        self.state.lock().i2c_reads
    }

    pub fn pin_writes(&self) -> Vec<PinEvent> {
        self.state.lock().pin_log.clone()
    }

    pub fn strobes(&self) -> Vec<Strobe> {
        self.state.lock().strobes.clone()
    }

    pub fn pin_mode(&self, pin: u8) -> Option<PinMode> {
        self.state.lock().modes.get(&pin).copied()
    }

    /// Forget recorded traffic.
    pub fn clear_logs(&self) {
        let mut state = self.state.lock();
        state.commands.clear();
        state.i2c_writes = 0;
        state.i2c_reads = 0;
        state.pin_log.clear();
        state.strobes.clear();
    }
}

impl SimState {
    fn open_frame(&mut self, frame: Frame) {
        self.frame = frame;
        self.lane = 0;
        self.byte_index = 0;
        self.word = [0; 4];
        self.driven = None;
    }

    fn level(&self, pin: u8) -> bool {
        self.levels.get(&pin).is_some_and(|v| v.is_high())
    }

    fn data_lines(&self) -> u8 {
        self.pins
            .data_pins()
            .iter()
            .enumerate()
            .fold(0u8, |acc, (bit, &pin)| acc | (self.level(pin) as u8) << bit)
    }

    fn receive_packet(&mut self, data: &[u8]) {
        self.i2c_writes += 1;
        self.polls_left = match self.behavior {
            Behavior::Slow { polls } => polls,
            _ => 0,
        };

        let mut buf = BytesMut::from(data);
        let response = match CommandCodec.decode(&mut buf) {
            Ok(Some(command)) if data.len() == COMMAND_LEN => {
                self.commands.push(command);
                if self.refused.contains(&command.op) {
                    NAK
                } else {
                    self.execute(&command)
                }
            }
            _ => {
                warn!("Simulator got malformed packet [{}]", hex::encode(data));
                NAK
            }
        };

        self.pending = match self.behavior {
            Behavior::Normal | Behavior::Slow { .. } => Some(response),
            Behavior::Silent => None,
            Behavior::Respond(byte) => Some(byte),
        };
    }

    fn execute(&mut self, command: &Command) -> u8 {
        let op = command.op;
        match op {
            opcodes::ARCH_INIT | opcodes::ARCH_END => {
                self.open_frame(Frame::Idle);
                ACK
            }
            opcodes::ARCH_RESET => {
                self.open_frame(Frame::Idle);
                self.banks = [V256::ZERO; 4];
                self.clear_after_op = false;
                ACK
            }
            opcodes::ARCH_GET_FLANK => self.flank,
            opcodes::ARCH_GET_VERSION_MAJOR => self.version.0,
            opcodes::ARCH_GET_VERSION_MINOR => self.version.1,
            opcodes::ARCH_GET_VERSION_PATCH => self.version.2,

            opcodes::STORE_A => self.start(Frame::Store(Bank::A)),
            opcodes::STORE_B => self.start(Frame::Store(Bank::B)),
            opcodes::LOAD_A => self.start(Frame::Load(Bank::A)),
            opcodes::LOAD_B => self.start(Frame::Load(Bank::B)),
            opcodes::LOAD_C => self.start(Frame::Load(Bank::C)),
            opcodes::LOAD_D => self.start(Frame::Load(Bank::D)),
            opcodes::END => self.start(Frame::Idle),

            opcodes::CTOA => self.copy(Bank::C, Bank::A),
            opcodes::CTOB => self.copy(Bank::C, Bank::B),
            opcodes::CLEAR_AFTEROP => {
                self.clear_after_op = true;
                ACK
            }
            opcodes::NOCLEAR_AFTEROP => {
                self.clear_after_op = false;
                ACK
            }
            opcodes::CLEAR_C => self.clear(&[Bank::C]),
            opcodes::CLEAR_D => self.clear(&[Bank::D]),
            opcodes::CLEAR_ALL => self.clear(&[Bank::A, Bank::B, Bank::C, Bank::D]),

            opcodes::NOTC => {
                let c = &mut self.banks[Bank::C as usize];
                for lane in c.as_u32_mut() {
                    *lane = !*lane;
                }
                ACK
            }
            opcodes::CPL2 => {
                let a = self.banks[Bank::A as usize];
                self.banks[Bank::C as usize] = V256::from_u32(a.as_u32().map(u32::wrapping_neg));
                self.finish_op()
            }
            opcodes::SHIFT_L | opcodes::SHIFT_R => {
                let a = self.banks[Bank::A as usize];
                let amount = command.arg as u32;
                let shifted = a.as_u32().map(|lane| {
                    if op == opcodes::SHIFT_L {
                        lane.checked_shl(amount).unwrap_or(0)
                    } else {
                        lane.checked_shr(amount).unwrap_or(0)
                    }
                });
                self.banks[Bank::C as usize] = V256::from_u32(shifted);
                self.finish_op()
            }
            _ => {
                if let Some(kind) = LaneOp::from_opcode(op) {
                    self.lane_op(kind, command)
                } else if let Some(cmp) = Compare::from_opcode(op) {
                    self.compare(cmp, command)
                } else {
                    debug!("Simulator does not know op 0x{:02x}", op);
                    NAK
                }
            }
        }
    }

    fn start(&mut self, frame: Frame) -> u8 {
        self.open_frame(frame);
        ACK
    }

    fn copy(&mut self, from: Bank, to: Bank) -> u8 {
        self.banks[to as usize] = self.banks[from as usize];
        ACK
    }

    fn clear(&mut self, banks: &[Bank]) -> u8 {
        for &bank in banks {
            self.banks[bank as usize] = V256::ZERO;
        }
        ACK
    }

    fn finish_op(&mut self) -> u8 {
        if self.clear_after_op {
            self.banks[Bank::A as usize] = V256::ZERO;
            self.banks[Bank::B as usize] = V256::ZERO;
        }
        ACK
    }

    fn lane_op(&mut self, kind: LaneOp, command: &Command) -> u8 {
        let (Some(ty), Ok(lanes)) = (
            ElementType::from_tag(command.ty),
            LaneCount::from_wire_arg(command.arg),
        ) else {
            return NAK;
        };

        let a = unpack(&self.banks[Bank::A as usize], ty);
        let b = unpack(&self.banks[Bank::B as usize], ty);
        let mut c = unpack(&self.banks[Bank::C as usize], ty);

        let covered = lanes.get() as usize * (32 / ty.bits()) as usize;
        for i in 0..covered {
            let (x, y) = (a[i], b[i]);
            c[i] = match kind {
                LaneOp::Add => x.wrapping_add(y),
                LaneOp::Sub => x.wrapping_sub(y),
                LaneOp::Mul => x.wrapping_mul(y),
                LaneOp::Div => x.checked_div(y).unwrap_or(0),
                LaneOp::And => x & y,
                LaneOp::Nand => !(x & y),
                LaneOp::Or => x | y,
                LaneOp::Xor => x ^ y,
                LaneOp::Nor => !(x | y),
                LaneOp::Not => !x,
            };
        }

        self.banks[Bank::C as usize] = pack(&c, ty);
        self.finish_op()
    }

    fn compare(&mut self, cmp: Compare, command: &Command) -> u8 {
        let Some(ty) = ElementType::from_tag(command.ty) else {
            return NAK;
        };
        let a = unpack(&self.banks[Bank::A as usize], ty);
        let b = unpack(&self.banks[Bank::B as usize], ty);

        let mask: Vec<i64> = a
            .iter()
            .zip(&b)
            .map(|(x, y)| {
                let hit = match cmp {
                    Compare::Eq => x == y,
                    Compare::Ne => x != y,
                    Compare::Gt => x > y,
                    Compare::Ge => x >= y,
                    Compare::Lt => x < y,
                    Compare::Le => x <= y,
                };
                if hit {
                    -1
                } else {
                    0
                }
            })
            .collect();

        self.banks[Bank::C as usize] = pack(&mask, ty);
        self.finish_op()
    }

    fn read_response(&mut self) -> Option<u8> {
        self.i2c_reads += 1;
        self.pending?;
        if self.polls_left > 0 {
            self.polls_left -= 1;
            return None;
        }
        self.pending.take()
    }

    fn write_pin(&mut self, pin: u8, value: PinValue) {
        let previous = self.levels.insert(pin, value);
        self.pin_log.push(PinEvent { pin, value });

        if pin == self.pins.clock && previous == Some(PinValue::High) && value == PinValue::Low {
            self.falling_edge();
        }
    }

    fn falling_edge(&mut self) {
        let entry = self.level(self.pins.entry);
        let data = self.data_lines();
        self.strobes.push(Strobe { entry, data });

        if entry {
            self.byte_index = 0;
            self.word = [0; 4];
        }
        if self.lane >= LANES || self.byte_index >= 4 {
            return;
        }

        match self.frame {
            Frame::Idle => {}
            Frame::Store(bank) => {
                self.word[self.byte_index] = data;
                self.byte_index += 1;
                if self.byte_index == 4 {
                    self.banks[bank as usize].as_u32_mut()[self.lane] = u32::from_le_bytes(self.word);
                    self.lane += 1;
                    self.byte_index = 0;
                }
            }
            Frame::Load(bank) => {
                let bytes = self.banks[bank as usize].as_u32()[self.lane].to_le_bytes();
                self.driven = Some(bytes[self.byte_index]);
                self.byte_index += 1;
                if self.byte_index == 4 {
                    self.lane += 1;
                    self.byte_index = 0;
                }
            }
        }
    }

    fn read_pin(&self, pin: u8) -> PinValue {
        if let (Some(byte), Some(bit)) = (
            self.driven,
            self.pins.data_pins().iter().position(|&p| p == pin),
        ) {
            return (((byte >> bit) & 1) == 1).into();
        }
        self.levels.get(&pin).copied().unwrap_or(PinValue::Low)
    }
}

// Elements of `v` as i64, sign-extended for signed types.
fn unpack(v: &V256, ty: ElementType) -> Vec<i64> {
    match ty {
        ElementType::U32 => v.as_u32().iter().map(|&x| x as i64).collect(),
        ElementType::I32 => v.to_i32().iter().map(|&x| x as i64).collect(),
        ElementType::U16 => v.to_u16().iter().map(|&x| x as i64).collect(),
        ElementType::I16 => v.to_i16().iter().map(|&x| x as i64).collect(),
        ElementType::U8 => v.to_u8().iter().map(|&x| x as i64).collect(),
        ElementType::I8 => v.to_i8().iter().map(|&x| x as i64).collect(),
    }
}

// Truncate each element to the type width and repack.
fn pack(values: &[i64], ty: ElementType) -> V256 {
    match ty.bits() {
        32 => {
            let mut lanes = [0u32; LANES];
            for (lane, &x) in lanes.iter_mut().zip(values) {
                *lane = x as u32;
            }
            V256::from_u32(lanes)
        }
        16 => {
            let mut halves = [0u16; 16];
            for (half, &x) in halves.iter_mut().zip(values) {
                *half = x as u16;
            }
            V256::from_u16(halves)
        }
        _ => {
            let mut bytes = [0u8; 32];
            for (byte, &x) in bytes.iter_mut().zip(values) {
                *byte = x as u8;
            }
            V256::from_u8(bytes)
        }
    }
}

/// I2C side of a [`SimDevice`].
pub struct SimI2c {
    state: Arc<Mutex<SimState>>,
}

#[async_trait]
impl I2c for SimI2c {
    async fn write(&mut self, addr: u8, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if addr != state.address {
            return Err(I2cError::NoAck(addr).into());
        }
        state.receive_packet(data);
        Ok(())
    }

    async fn read(&mut self, addr: u8, buffer: &mut [u8]) -> Result<()> {
        let mut state = self.state.lock();
        if addr != state.address {
            return Err(I2cError::NoAck(addr).into());
        }
        match state.read_response() {
            Some(byte) => {
                if let Some(first) = buffer.first_mut() {
                    *first = byte;
                }
                Ok(())
            }
            None => Err(I2cError::NoAck(addr).into()),
        }
    }
}

/// GPIO side of a [`SimDevice`].
pub struct SimGpio {
    state: Arc<Mutex<SimState>>,
}

impl SimGpio {
    fn check(state: &SimState, pin: u8) -> Result<()> {
        if state.pins.all_pins().contains(&pin) {
            Ok(())
        } else {
            Err(HwError::InvalidPin(pin))
        }
    }
}

#[async_trait]
impl Gpio for SimGpio {
    async fn set_mode(&mut self, pin: u8, mode: PinMode) -> Result<()> {
        let mut state = self.state.lock();
        Self::check(&state, pin)?;
        state.modes.insert(pin, mode);
        Ok(())
    }

    async fn write(&mut self, pin: u8, value: PinValue) -> Result<()> {
        let mut state = self.state.lock();
        Self::check(&state, pin)?;
        state.write_pin(pin, value);
        Ok(())
    }

    async fn read(&mut self, pin: u8) -> Result<PinValue> {
        let state = self.state.lock();
        Self::check(&state, pin)?;
        Ok(state.read_pin(pin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prism::protocol::types;

    fn command(sim: &SimDevice, cmd: Command) -> Option<u8> {
        let mut state = sim.state.lock();
        state.receive_packet(&cmd.to_bytes());
        state.read_response()
    }

    #[test]
    fn test_add_signed_16() {
        let sim = SimDevice::new(0x20);
        let mut a = [0i16; 16];
        let mut b = [0i16; 16];
        a[0] = -5;
        b[0] = 3;
        a[15] = 100;
        b[15] = 1;
        sim.set_bank(Bank::A, V256::from_i16(a));
        sim.set_bank(Bank::B, V256::from_i16(b));

        let cmd = Command::lane_op(LaneOp::Add, LaneCount::ALL, ElementType::I16, 10);
        assert_eq!(command(&sim, cmd), Some(ACK));

        let c = sim.bank(Bank::C).to_i16();
        assert_eq!(c[0], -2);
        assert_eq!(c[15], 101);
    }

    #[test]
    fn test_lane_count_limits_coverage() {
        let sim = SimDevice::new(0x20);
        sim.set_bank(Bank::A, V256::from_u32([1; LANES]));
        sim.set_bank(Bank::B, V256::from_u32([2; LANES]));

        let lanes = LaneCount::new(3).unwrap();
        let cmd = Command::lane_op(LaneOp::Mul, lanes, ElementType::U32, 10);
        assert_eq!(command(&sim, cmd), Some(ACK));
        assert_eq!(sim.bank(Bank::C).as_u32(), &[2, 2, 2, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_signed_division_and_compare() {
        let sim = SimDevice::new(0x20);
        sim.set_bank(Bank::A, V256::set8_i32(-9, 9, 0, 1, 5, 5, 5, 5));
        sim.set_bank(Bank::B, V256::set8_i32(3, -3, 0, 0, 5, 6, 4, 5));

        let cmd = Command::lane_op(LaneOp::Div, LaneCount::ALL, ElementType::I32, 10);
        assert_eq!(command(&sim, cmd), Some(ACK));
        assert_eq!(sim.bank(Bank::C).to_i32(), [-3, -3, 0, 0, 1, 0, 1, 1]);

        let cmd = Command::bare(opcodes::CMP_LT, types::SI32, 10);
        assert_eq!(command(&sim, cmd), Some(ACK));
        assert_eq!(sim.bank(Bank::C).to_i32(), [-1, 0, 0, 0, 0, -1, 0, 0]);
    }

    #[test]
    fn test_clear_after_op() {
        let sim = SimDevice::new(0x20);
        sim.set_bank(Bank::A, V256::from_u32([1; LANES]));
        assert_eq!(command(&sim, Command::bare(opcodes::CLEAR_AFTEROP, types::UI32, 10)), Some(ACK));

        let cmd = Command::lane_op(LaneOp::Not, LaneCount::ALL, ElementType::U32, 10);
        assert_eq!(command(&sim, cmd), Some(ACK));
        assert_eq!(sim.bank(Bank::C).as_u32(), &[!1u32; LANES]);
        assert_eq!(sim.bank(Bank::A), V256::ZERO);
    }

    #[test]
    fn test_unknown_op_and_type_are_refused() {
        let sim = SimDevice::new(0x20);
        assert_eq!(command(&sim, Command::bare(0x7f, types::UI32, 10)), Some(NAK));

        let cmd = Command::new(opcodes::ADD_N, 0, 0x42, 10);
        assert_eq!(command(&sim, cmd), Some(NAK));
    }

    #[test]
    fn test_malformed_packet_refused() {
        let sim = SimDevice::new(0x20);
        let mut state = sim.state.lock();
        state.receive_packet(&[0x58, 0x00, 0xff]);
        assert_eq!(state.read_response(), Some(NAK));
        assert!(state.commands.is_empty());
    }
}
