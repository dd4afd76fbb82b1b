//! 256-bit vector value.
//!
//! A `V256` stores eight 32-bit lanes. The narrower views split each lane
//! little-endian, matching how the device lays out 16- and 8-bit elements,
//! so element `k` of the 16-bit view is the low half of lane `k / 2` when
//! `k` is even.

use crate::error::{Error, Result};

use super::protocol::LANES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct V256 {
    lanes: [u32; LANES],
}

impl V256 {
    pub const ZERO: V256 = V256 { lanes: [0; LANES] };

    pub const fn from_u32(lanes: [u32; LANES]) -> Self {
        Self { lanes }
    }

    pub fn from_i32(values: [i32; LANES]) -> Self {
        Self::from_u32(values.map(|v| v as u32))
    }

    pub fn from_u16(values: [u16; 16]) -> Self {
        let mut lanes = [0u32; LANES];
        for (lane, pair) in lanes.iter_mut().zip(values.chunks_exact(2)) {
            *lane = pair[0] as u32 | (pair[1] as u32) << 16;
        }
        Self { lanes }
    }

    pub fn from_i16(values: [i16; 16]) -> Self {
        Self::from_u16(values.map(|v| v as u16))
    }

    pub fn from_u8(values: [u8; 32]) -> Self {
        let mut lanes = [0u32; LANES];
        for (lane, quad) in lanes.iter_mut().zip(values.chunks_exact(4)) {
            *lane = u32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]);
        }
        Self { lanes }
    }

    pub fn from_i8(values: [i8; 32]) -> Self {
        Self::from_u8(values.map(|v| v as u8))
    }

    /// Build from eight unsigned lanes, lane 0 first.
    #[allow(clippy::too_many_arguments)]
    pub fn set8_u32(a: u32, b: u32, c: u32, d: u32, e: u32, f: u32, g: u32, h: u32) -> Self {
        Self::from_u32([a, b, c, d, e, f, g, h])
    }

    /// Build from up to eight leading lanes; the rest are zero.
    pub fn from_prefix(values: &[u32]) -> Result<Self> {
        if values.len() > LANES {
            return Err(Error::invalid(format!(
                "{} lanes given, vector holds {}",
                values.len(),
                LANES
            )));
        }
        let mut lanes = [0u32; LANES];
        lanes[..values.len()].copy_from_slice(values);
        Ok(Self { lanes })
    }

    /// Build from eight signed lanes, lane 0 first.
    #[allow(clippy::too_many_arguments)]
    pub fn set8_i32(a: i32, b: i32, c: i32, d: i32, e: i32, f: i32, g: i32, h: i32) -> Self {
        Self::from_i32([a, b, c, d, e, f, g, h])
    }

    pub fn as_u32(&self) -> &[u32; LANES] {
        &self.lanes
    }

    pub fn as_u32_mut(&mut self) -> &mut [u32; LANES] {
        &mut self.lanes
    }

    pub fn to_i32(&self) -> [i32; LANES] {
        self.lanes.map(|v| v as i32)
    }

    pub fn to_u16(&self) -> [u16; 16] {
        let mut out = [0u16; 16];
        for (pair, lane) in out.chunks_exact_mut(2).zip(self.lanes) {
            pair[0] = lane as u16;
            pair[1] = (lane >> 16) as u16;
        }
        out
    }

    pub fn to_i16(&self) -> [i16; 16] {
        self.to_u16().map(|v| v as i16)
    }

    pub fn to_u8(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (quad, lane) in out.chunks_exact_mut(4).zip(self.lanes) {
            quad.copy_from_slice(&lane.to_le_bytes());
        }
        out
    }

    pub fn to_i8(&self) -> [i8; 32] {
        self.to_u8().map(|v| v as i8)
    }

    /// Lane `n`, wrapping modulo 8.
    pub fn extract_u32(&self, n: u8) -> u32 {
        self.lanes[n as usize % LANES]
    }
}

impl From<[u32; LANES]> for V256 {
    fn from(lanes: [u32; LANES]) -> Self {
        Self::from_u32(lanes)
    }
}

impl From<V256> for [u32; LANES] {
    fn from(v: V256) -> Self {
        v.lanes
    }
}
