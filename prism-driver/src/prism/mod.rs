//! Prism vector coprocessor driver.
//!
//! The device holds four 256-bit register banks (A, B, C, D) and executes
//! lane-wise arithmetic, logic, comparison and shift operations on them.
//! Commands travel over I2C ([`channel`]); bank contents travel over a
//! clock-strobed parallel bus ([`bus`]). Lane operations read A and B and
//! write C.
//!
//! A bank transfer is a three-step frame:
//!
//! ```text
//! STORE_x / LOAD_x   (I2C, acknowledged)
//! 8 x 32-bit lanes   (parallel bus, unacknowledged)
//! END                (I2C, best effort)
//! ```
//!
//! There is no per-lane error signaling; a transfer either completes or
//! fails as a whole at the first failed step.

pub mod bus;
pub mod channel;
mod ops;
pub mod protocol;
pub mod vector;

use std::fmt;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hw_trait::{Delay, Gpio, I2c};
use crate::tracing::prelude::*;

pub use bus::ParallelBus;
pub use channel::OpcodeChannel;
pub use protocol::{Bank, Command, Compare, ElementType, LaneCount, LaneOp, ShiftDirection};
pub use vector::V256;

use protocol::{opcodes, types, NO_ARG};

/// Protocol version this driver speaks.
pub const PROTOCOL_VERSION: (u8, u8, u8) = (1, 0, 1);

/// Timeout (ms) for init, reset and stop.
pub const LIFECYCLE_TIMEOUT: u32 = 255;

/// True when `major.minor.patch` is exactly [`PROTOCOL_VERSION`].
pub fn version_matches(major: u8, minor: u8, patch: u8) -> bool {
    (major, minor, patch) == PROTOCOL_VERSION
}

/// Identification reported by the device at creation.
///
/// Fields the device did not report are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceInfo {
    pub flank: u8,
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl DeviceInfo {
    pub fn version(&self) -> (u8, u8, u8) {
        (self.major, self.minor, self.patch)
    }

    /// Whether the device answered the version queries at all.
    pub fn is_reported(&self) -> bool {
        self.version() != (0, 0, 0)
    }

    pub fn is_compatible(&self) -> bool {
        version_matches(self.major, self.minor, self.patch)
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Handle to one Prism device.
///
/// Owns its transports. Every operation takes `&mut self`, so a handle has
/// at most one command in flight; share it across tasks behind a mutex.
pub struct Prism<I2C, G, D> {
    channel: OpcodeChannel<I2C, D>,
    bus: ParallelBus<G, D>,
    delay: D,
    settle_ms: u32,
    info: DeviceInfo,
}

impl<I2C: I2c, G: Gpio, D: Delay + Clone> Prism<I2C, G, D> {
    /// Bring up a device.
    ///
    /// Fails with [`Error::InvalidArgument`] for an address outside
    /// 1..=127 or a pin map that reuses a GPIO, before touching either bus.
    /// Host GPIO failures while idling the parallel bus are returned.
    /// Everything the device itself does wrong during init (no ack, no
    /// version) is logged and otherwise ignored, leaving zeroes in
    /// [`Prism::info`].
    pub async fn create(i2c: I2C, gpio: G, delay: D, config: &Config) -> Result<Self> {
        let address = config.device.address;
        if !(1..=127).contains(&address) {
            return Err(Error::invalid(format!("I2C address 0x{:02x} not in 1..=127", address)));
        }

        let pins = config.device.pins.unwrap_or_default();
        pins.validate().map_err(|e| Error::invalid(e.to_string()))?;

        let timing = config.timing;
        let mut prism = Self {
            channel: OpcodeChannel::new(i2c, delay.clone(), address, timing),
            bus: ParallelBus::new(gpio, delay.clone(), pins, timing),
            delay,
            settle_ms: timing.settle_ms,
            info: DeviceInfo::default(),
        };

        prism.init(config.device.init_bus, timing.bus_settle_ms).await?;
        Ok(prism)
    }

    async fn init(&mut self, init_bus: bool, bus_settle_ms: u32) -> Result<()> {
        let address = self.channel.address();
        debug!("Initializing Prism at 0x{:02x}", address);

        if init_bus {
            if let Err(e) = self.channel.init_bus().await {
                warn!("I2C bus init failed: {}", e);
            }
        }
        self.delay.delay_ms(bus_settle_ms).await;

        self.bus.init().await?;

        // ARCH_INIT is opcode 0, which the no-argument form rejects
        if let Err(e) = self
            .channel
            .send_opcode_with_arg(opcodes::ARCH_INIT, types::UI32, NO_ARG, LIFECYCLE_TIMEOUT)
            .await
        {
            warn!("Prism at 0x{:02x} did not acknowledge init: {}", address, e);
        }

        self.info = DeviceInfo {
            flank: self.query(opcodes::ARCH_GET_FLANK).await,
            major: self.query(opcodes::ARCH_GET_VERSION_MAJOR).await,
            minor: self.query(opcodes::ARCH_GET_VERSION_MINOR).await,
            patch: self.query(opcodes::ARCH_GET_VERSION_PATCH).await,
        };

        if self.info.is_reported() {
            info!(
                "Prism at 0x{:02x}: version {}, flank {}",
                address, self.info, self.info.flank
            );
            if !self.info.is_compatible() {
                let (major, minor, patch) = PROTOCOL_VERSION;
                warn!(
                    "Prism firmware {} differs from driver protocol {}.{}.{}",
                    self.info, major, minor, patch
                );
            }
        } else {
            warn!("Prism at 0x{:02x} did not report a version", address);
        }

        Ok(())
    }

    async fn query(&mut self, op: u16) -> u8 {
        self.channel.query(op).await.unwrap_or(0)
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn address(&self) -> u8 {
        self.channel.address()
    }

    /// Reset the device, zeroing all banks.
    pub async fn reset(&mut self) -> Result<()> {
        self.lifecycle(opcodes::ARCH_RESET).await
    }

    /// Shut the device down.
    pub async fn stop(&mut self) -> Result<()> {
        self.lifecycle(opcodes::ARCH_END).await
    }

    async fn lifecycle(&mut self, op: u16) -> Result<()> {
        self.channel.send_opcode(op, types::UI8, LIFECYCLE_TIMEOUT).await?;
        self.delay.delay_ms(self.settle_ms).await;
        Ok(())
    }

    /// Write eight lanes into bank A or B.
    pub async fn store_bank(&mut self, vector: &V256, bank: Bank, timeout: u32) -> Result<()> {
        let op = bank
            .store_opcode()
            .ok_or_else(|| Error::invalid(format!("bank {} is not writable", bank)))?;

        self.channel.send_opcode(op, types::UI32, timeout).await?;

        let sent = self.bus.send_vector(vector).await;
        self.end_frame(types::UI8, timeout).await;
        sent?;

        debug!("Stored bank {}: {:08x?}", bank, vector.as_u32());
        Ok(())
    }

    /// Read the eight lanes of any bank.
    pub async fn load_bank(&mut self, bank: Bank, timeout: u32) -> Result<V256> {
        self.channel
            .send_opcode(bank.load_opcode(), types::UI8, timeout)
            .await?;

        let received = self.bus.recv_vector().await;
        self.end_frame(types::UI32, timeout).await;
        let vector = received?;

        debug!("Loaded bank {}: {:08x?}", bank, vector.as_u32());
        Ok(vector)
    }

    // END closes the transfer frame; its outcome never changes the result.
    async fn end_frame(&mut self, ty: u8, timeout: u32) {
        if let Err(e) = self.channel.send_opcode(opcodes::END, ty, timeout).await {
            warn!("END after bank transfer failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PinConfig;
    use crate::error::ErrorCode;
    use crate::hw_trait::{self, HwError, I2cError, TokioDelay};
    use crate::sim::{Behavior, SimDevice, SimGpio, SimI2c};
    use async_trait::async_trait;
    use test_case::test_case;

    type SimPrism = Prism<SimI2c, SimGpio, TokioDelay>;

    async fn create_at(sim: &SimDevice, address: u8) -> Result<SimPrism> {
        let mut config = Config::default();
        config.device.address = address;
        Prism::create(sim.i2c(), sim.gpio(PinConfig::default()), TokioDelay, &config).await
    }

    // Pins disjoint from the default map; wiring the sim to these makes
    // every pin the driver uses unknown to the host controller.
    fn foreign_pins() -> PinConfig {
        PinConfig {
            low: [20, 21, 22, 23],
            clock: 24,
            entry: 25,
            high: [26, 27, 28, 29],
        }
    }

    // I2C master that cannot join the bus but still talks to the sim.
    struct NoMasterI2c(SimI2c);

    #[async_trait]
    impl I2c for NoMasterI2c {
        async fn init(&mut self) -> hw_trait::Result<()> {
            Err(I2cError::BusError.into())
        }

        async fn write(&mut self, addr: u8, data: &[u8]) -> hw_trait::Result<()> {
            self.0.write(addr, data).await
        }

        async fn read(&mut self, addr: u8, buffer: &mut [u8]) -> hw_trait::Result<()> {
            self.0.read(addr, buffer).await
        }
    }

    async fn device() -> (SimDevice, SimPrism) {
        let sim = SimDevice::new(0x20);
        sim.set_info(2, PROTOCOL_VERSION);
        let prism = create_at(&sim, 0x20).await.unwrap();
        sim.clear_logs();
        (sim, prism)
    }

    #[test_case(0 ; "zero")]
    #[test_case(128 ; "too high")]
    #[test_case(0xff ; "max")]
    #[tokio::test(start_paused = true)]
    async fn test_create_rejects_address(address: u8) {
        let sim = SimDevice::new(0x20);
        let err = create_at(&sim, address).await.err().unwrap();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert_eq!(sim.i2c_writes(), 0);
        assert!(sim.pin_writes().is_empty());
    }

    #[test_case(1 ; "lowest")]
    #[test_case(127 ; "highest")]
    #[tokio::test(start_paused = true)]
    async fn test_create_accepts_address(address: u8) {
        let sim = SimDevice::new(address);
        let prism = create_at(&sim, address).await.unwrap();
        assert_eq!(prism.address(), address);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_rejects_shared_pins() {
        let sim = SimDevice::new(0x20);
        let mut config = Config::default();
        let mut pins = PinConfig::default();
        pins.entry = pins.clock;
        config.device.pins = Some(pins);

        let err = Prism::create(sim.i2c(), sim.gpio(pins), TokioDelay, &config)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(sim.i2c_writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_sequence() {
        let sim = SimDevice::new(0x20);
        sim.set_info(3, (1, 0, 1));
        let prism = create_at(&sim, 0x20).await.unwrap();

        let ops: Vec<u16> = sim.commands().iter().map(|c| c.op).collect();
        assert_eq!(
            ops,
            vec![
                opcodes::ARCH_INIT,
                opcodes::ARCH_GET_FLANK,
                opcodes::ARCH_GET_VERSION_MAJOR,
                opcodes::ARCH_GET_VERSION_MINOR,
                opcodes::ARCH_GET_VERSION_PATCH,
            ]
        );
        assert_eq!(sim.commands()[0], Command::new(opcodes::ARCH_INIT, NO_ARG, types::UI32, 255));

        let info = prism.info();
        assert_eq!(info.flank, 3);
        assert_eq!(info.version(), (1, 0, 1));
        assert!(info.is_compatible());
        assert_eq!(info.to_string(), "1.0.1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_tolerates_silent_device() {
        let sim = SimDevice::new(0x20);
        sim.set_behavior(Behavior::Silent);
        let prism = create_at(&sim, 0x20).await.unwrap();
        assert_eq!(*prism.info(), DeviceInfo::default());
        assert!(!prism.info().is_reported());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_idles_bus() {
        let sim = SimDevice::new(0x20);
        create_at(&sim, 0x20).await.unwrap();

        let pins = PinConfig::default();
        assert_eq!(sim.pin_mode(pins.clock), Some(crate::hw_trait::PinMode::Output));
        assert_eq!(sim.pin_mode(pins.entry), Some(crate::hw_trait::PinMode::Output));
        assert_eq!(sim.pin_mode(pins.low[0]), Some(crate::hw_trait::PinMode::Input));
    }

    #[test_case(Bank::C ; "bank c")]
    #[test_case(Bank::D ; "bank d")]
    #[tokio::test(start_paused = true)]
    async fn test_store_rejects_read_only_bank(bank: Bank) {
        let (sim, mut prism) = device().await;

        let err = prism.store_bank(&V256::ZERO, bank, 100).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert_eq!(sim.i2c_writes(), 0);
        assert!(sim.pin_writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_then_load_roundtrip() {
        let (sim, mut prism) = device().await;
        let values = V256::set8_u32(
            0x0000_0001,
            0xdead_beef,
            0x8000_0000,
            0x0102_0304,
            0xffff_ffff,
            0,
            0x1234_5678,
            0xa5a5_5a5a,
        );

        prism.store_bank(&values, Bank::A, 1000).await.unwrap();
        assert_eq!(sim.bank(Bank::A), values);

        let loaded = prism.load_bank(Bank::A, 1000).await.unwrap();
        assert_eq!(loaded, values);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_frames() {
        let (sim, mut prism) = device().await;

        prism.store_bank(&V256::ZERO, Bank::B, 500).await.unwrap();
        prism.load_bank(Bank::D, 500).await.unwrap();

        assert_eq!(
            sim.commands(),
            vec![
                Command::bare(opcodes::STORE_B, types::UI32, 500),
                Command::bare(opcodes::END, types::UI8, 500),
                Command::bare(opcodes::LOAD_D, types::UI8, 500),
                Command::bare(opcodes::END, types::UI32, 500),
            ]
        );
        // 8 lanes x 4 bytes each way
        assert_eq!(sim.strobes().len(), 64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_reads_result_bank() {
        let (sim, mut prism) = device().await;
        let c = V256::set8_i32(-1, -2, -3, -4, 5, 6, 7, 8);
        sim.set_bank(Bank::C, c);

        assert_eq!(prism.load_bank(Bank::C, 100).await.unwrap(), c);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_store_moves_no_data() {
        let (sim, mut prism) = device().await;
        sim.refuse(opcodes::STORE_A);

        let err = prism.store_bank(&V256::ZERO, Bank::A, 100).await.unwrap_err();
        assert!(matches!(err, Error::Rejected { response: 0, .. }));
        assert!(sim.strobes().is_empty());
        assert_eq!(sim.commands().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_failure_does_not_fail_transfer() {
        let (sim, mut prism) = device().await;
        sim.refuse(opcodes::END);
        let values = V256::from_u32([7; 8]);

        prism.store_bank(&values, Bank::A, 100).await.unwrap();
        assert_eq!(prism.load_bank(Bank::A, 100).await.unwrap(), values);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gpio_failure_mid_store_still_sends_end() {
        let (sim, mut prism) = device().await;
        sim.gpio(foreign_pins());

        let err = prism
            .store_bank(&V256::from_u32([5; 8]), Bank::A, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Hardware(HwError::InvalidPin(2))));
        assert_eq!(err.code(), ErrorCode::Unknown);

        let ops: Vec<u16> = sim.commands().iter().map(|c| c.op).collect();
        assert_eq!(ops, vec![opcodes::STORE_A, opcodes::END]);
        assert_eq!(sim.bank(Bank::A), V256::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gpio_failure_mid_load_still_sends_end() {
        let (sim, mut prism) = device().await;
        sim.set_bank(Bank::C, V256::from_u32([3; 8]));
        sim.gpio(foreign_pins());

        let err = prism.load_bank(Bank::C, 100).await.unwrap_err();
        assert!(matches!(err, Error::Hardware(HwError::InvalidPin(7))));
        assert_eq!(err.code(), ErrorCode::Unknown);

        let ops: Vec<u16> = sim.commands().iter().map(|c| c.op).collect();
        assert_eq!(ops, vec![opcodes::LOAD_C, opcodes::END]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_fails_on_host_gpio_error() {
        let sim = SimDevice::new(0x20);
        let gpio = sim.gpio(foreign_pins());

        let err = Prism::create(sim.i2c(), gpio, TokioDelay, &Config::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Hardware(HwError::InvalidPin(_))));
        assert_eq!(sim.i2c_writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_survives_i2c_init_failure() {
        let sim = SimDevice::new(0x20);
        sim.set_info(4, PROTOCOL_VERSION);
        let i2c = NoMasterI2c(sim.i2c());

        let prism = Prism::create(
            i2c,
            sim.gpio(PinConfig::default()),
            TokioDelay,
            &Config::default(),
        )
        .await
        .unwrap();
        assert_eq!(prism.info().flank, 4);
        assert!(prism.info().is_compatible());
        assert_eq!(sim.commands()[0].op, opcodes::ARCH_INIT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_and_stop() {
        let (sim, mut prism) = device().await;
        sim.set_bank(Bank::A, V256::from_u32([9; 8]));

        prism.reset().await.unwrap();
        assert_eq!(sim.bank(Bank::A), V256::ZERO);
        prism.stop().await.unwrap();

        assert_eq!(
            sim.commands(),
            vec![
                Command::bare(opcodes::ARCH_RESET, types::UI8, 255),
                Command::bare(opcodes::ARCH_END, types::UI8, 255),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_errors_propagate() {
        let (sim, mut prism) = device().await;
        sim.set_behavior(Behavior::Respond(0x02));
        assert!(matches!(
            prism.reset().await.unwrap_err(),
            Error::Rejected { response: 0x02, .. }
        ));

        sim.set_behavior(Behavior::Silent);
        assert!(matches!(
            prism.stop().await.unwrap_err(),
            Error::NotResponding { .. }
        ));
    }

    #[test]
    fn test_version_matches() {
        assert!(version_matches(1, 0, 1));
        assert!(!version_matches(1, 0, 0));
        assert!(!DeviceInfo::default().is_compatible());
    }
}
