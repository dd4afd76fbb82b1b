//! Clock-strobed parallel bus between host and device.
//!
//! Bytes move across eight data lines (two nibbles), a clock line and an
//! entry-flag line. The receiver acts on the falling clock edge. The entry
//! flag is high for the first byte of every 32-bit word and low for the
//! other three, which resets the device's byte-to-word assembly index.
//!
//! Words travel least-significant byte first. Nothing on this bus reports
//! device-side errors: a glitch mid-word leaves the framing undefined until
//! the next STORE/LOAD ... END sequence on the control channel. Only host
//! side GPIO failures surface as errors.

use bitvec::prelude::*;

use crate::config::{PinConfig, Timing};
use crate::hw_trait::{Delay, Gpio, PinMode, PinValue, Result};
use crate::tracing::prelude::*;

use super::protocol::LANES;
use super::vector::V256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Host drives the data lines
    Send,
    /// Device drives the data lines
    Receive,
}

/// Byte and word transporter over the ten bus lines.
pub struct ParallelBus<G, D> {
    gpio: G,
    delay: D,
    pins: PinConfig,
    timing: Timing,
    direction: Option<Direction>,
}

impl<G: Gpio, D: Delay> ParallelBus<G, D> {
    pub fn new(gpio: G, delay: D, pins: PinConfig, timing: Timing) -> Self {
        Self {
            gpio,
            delay,
            pins,
            timing,
            direction: None,
        }
    }

    pub fn pins(&self) -> &PinConfig {
        &self.pins
    }

    /// Put the bus in its idle state: clock and entry flag driven low, data
    /// lines released.
    pub async fn init(&mut self) -> Result<()> {
        for pin in [self.pins.clock, self.pins.entry] {
            self.gpio.set_mode(pin, PinMode::Output).await?;
            self.gpio.write(pin, PinValue::Low).await?;
        }
        self.set_direction(Direction::Receive).await?;
        debug!(
            "Parallel bus ready (clock {}, entry {}, data {:?})",
            self.pins.clock,
            self.pins.entry,
            self.pins.data_pins()
        );
        Ok(())
    }

    async fn set_direction(&mut self, direction: Direction) -> Result<()> {
        if self.direction == Some(direction) {
            return Ok(());
        }
        let mode = match direction {
            Direction::Send => PinMode::Output,
            Direction::Receive => PinMode::Input,
        };
        for pin in self.pins.data_pins() {
            self.gpio.set_mode(pin, mode).await?;
        }
        trace!("Data lines switched to {:?}", mode);
        self.direction = Some(direction);
        Ok(())
    }

    /// Strobe one byte out to the device.
    pub async fn send_byte(&mut self, value: u8, new_entry: bool) -> Result<()> {
        self.set_direction(Direction::Send).await?;

        self.gpio.write(self.pins.entry, new_entry.into()).await?;
        self.gpio.write(self.pins.clock, PinValue::High).await?;

        for (pin, bit) in self.pins.data_pins().into_iter().zip(value.view_bits::<Lsb0>()) {
            self.gpio.write(pin, (*bit).into()).await?;
        }
        self.delay.delay_us(self.timing.setup_us).await;

        // Falling edge: the device latches the data lines here
        self.gpio.write(self.pins.clock, PinValue::Low).await?;
        if new_entry {
            self.gpio.write(self.pins.entry, PinValue::Low).await?;
        }
        self.delay.delay_us(self.timing.send_hold_us).await;

        Ok(())
    }

    /// Strobe one byte in from the device.
    pub async fn recv_byte(&mut self, new_entry: bool) -> Result<u8> {
        self.set_direction(Direction::Receive).await?;

        self.gpio.write(self.pins.entry, new_entry.into()).await?;
        self.gpio.write(self.pins.clock, PinValue::High).await?;
        self.delay.delay_us(self.timing.setup_us).await;

        // Falling edge: the device presents the next byte
        self.gpio.write(self.pins.clock, PinValue::Low).await?;
        self.delay.delay_us(self.timing.recv_hold_us).await;
        if new_entry {
            self.gpio.write(self.pins.entry, PinValue::Low).await?;
        }

        let mut value = 0u8;
        let bits = value.view_bits_mut::<Lsb0>();
        for (i, pin) in self.pins.data_pins().into_iter().enumerate() {
            bits.set(i, self.gpio.read(pin).await?.is_high());
        }
        Ok(value)
    }

    /// Send a 32-bit lane, least-significant byte first.
    pub async fn send_word(&mut self, word: u32) -> Result<()> {
        for (i, byte) in word.to_le_bytes().into_iter().enumerate() {
            self.send_byte(byte, i == 0).await?;
        }
        trace!("Sent word 0x{:08x}", word);
        Ok(())
    }

    /// Receive a 32-bit lane, least-significant byte first.
    pub async fn recv_word(&mut self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.recv_byte(i == 0).await?;
        }
        let word = u32::from_le_bytes(bytes);
        trace!("Received word 0x{:08x}", word);
        Ok(word)
    }

    /// Send all eight lanes in order.
    pub async fn send_vector(&mut self, vector: &V256) -> Result<()> {
        for &lane in vector.as_u32() {
            self.send_word(lane).await?;
        }
        Ok(())
    }

    /// Receive all eight lanes in order.
    pub async fn recv_vector(&mut self) -> Result<V256> {
        let mut lanes = [0u32; LANES];
        for lane in lanes.iter_mut() {
            *lane = self.recv_word().await?;
        }
        Ok(V256::from_u32(lanes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw_trait::TokioDelay;
    use crate::prism::protocol::Bank;
    use crate::sim::{PinEvent, SimDevice};

    fn bus(sim: &SimDevice) -> ParallelBus<crate::sim::SimGpio, TokioDelay> {
        let pins = PinConfig::default();
        ParallelBus::new(sim.gpio(pins), TokioDelay, pins, Timing::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_flag_once_per_word() {
        let sim = SimDevice::new(0x20);
        let mut bus = bus(&sim);
        bus.init().await.unwrap();
        sim.clear_logs();

        bus.send_word(0xdead_beef).await.unwrap();

        let entry = PinConfig::default().entry;
        let writes = sim.pin_writes();
        let raised = writes
            .iter()
            .filter(|e| e.pin == entry && e.value == PinValue::High)
            .count();
        assert_eq!(raised, 1);

        // First write of the word is the entry flag going high
        assert_eq!(writes[0], PinEvent { pin: entry, value: PinValue::High });

        let strobes = sim.strobes();
        let flags: Vec<bool> = strobes.iter().map(|s| s.entry).collect();
        assert_eq!(flags, vec![true, false, false, false]);
        let bytes: Vec<u8> = strobes.iter().map(|s| s.data).collect();
        assert_eq!(bytes, vec![0xef, 0xbe, 0xad, 0xde]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nibble_lines_carry_bits_in_order() {
        let sim = SimDevice::new(0x20);
        let mut bus = bus(&sim);
        bus.init().await.unwrap();
        sim.clear_logs();

        bus.send_byte(0b1000_0001, false).await.unwrap();

        let pins = PinConfig::default();
        let data: Vec<PinEvent> = sim
            .pin_writes()
            .into_iter()
            .filter(|e| pins.data_pins().contains(&e.pin))
            .collect();
        assert_eq!(data.len(), 8);
        assert_eq!(data[0], PinEvent { pin: 2, value: PinValue::High });
        assert_eq!(data[1], PinEvent { pin: 3, value: PinValue::Low });
        assert_eq!(data[7], PinEvent { pin: 11, value: PinValue::High });
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_falls_after_data_setup() {
        let sim = SimDevice::new(0x20);
        let mut bus = bus(&sim);
        bus.init().await.unwrap();
        sim.clear_logs();

        let start = tokio::time::Instant::now();
        bus.send_byte(0x5a, true).await.unwrap();
        // setup + hold
        assert!(start.elapsed() >= std::time::Duration::from_micros(6));

        let clock = PinConfig::default().clock;
        let writes = sim.pin_writes();
        let clock_writes: Vec<usize> = writes
            .iter()
            .enumerate()
            .filter(|(_, e)| e.pin == clock)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(clock_writes.len(), 2);
        assert_eq!(writes[clock_writes[0]].value, PinValue::High);
        assert_eq!(writes[clock_writes[1]].value, PinValue::Low);
        // all data lines are written between the rising and falling edge
        let data_between = writes[clock_writes[0]..clock_writes[1]]
            .iter()
            .filter(|e| PinConfig::default().data_pins().contains(&e.pin))
            .count();
        assert_eq!(data_between, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_word_switches_data_lines_to_input() {
        let sim = SimDevice::new(0x20);
        sim.set_bank(Bank::C, V256::set8_u32(0x0403_0201, 0, 0, 0, 0, 0, 0, 0));

        let mut bus = bus(&sim);
        bus.init().await.unwrap();
        bus.send_byte(0, false).await.unwrap();
        assert_eq!(sim.pin_mode(2), Some(PinMode::Output));

        sim.begin_load(Bank::C);
        let word = bus.recv_word().await.unwrap();
        assert_eq!(word, 0x0403_0201);
        for pin in PinConfig::default().data_pins() {
            assert_eq!(sim.pin_mode(pin), Some(PinMode::Input));
        }
    }
}
