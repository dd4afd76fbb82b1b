//! Exercise the driver end to end against the simulated device.
//!
//! Creates a device with the configured address and wiring, stores two
//! vectors, runs a handful of lane operations and checks the results read
//! back from bank C. Set RUST_LOG=prism_driver=trace to see every packet
//! and bus word.

use anyhow::{ensure, Context, Result};

use prism_driver::config::Config;
use prism_driver::hw_trait::TokioDelay;
use prism_driver::sim::SimDevice;
use prism_driver::tracing::{self, prelude::*};
use prism_driver::{Bank, Compare, ElementType, Prism, V256, PROTOCOL_VERSION};

const TIMEOUT: u32 = 1000;

#[tokio::main]
async fn main() -> Result<()> {
    tracing::init_journald_or_stdout();

    let config = Config::load().context("loading configuration")?;
    let pins = config.device.pins.unwrap_or_default();

    let sim = SimDevice::new(config.device.address);
    sim.set_info(1, PROTOCOL_VERSION);

    let mut prism = Prism::create(sim.i2c(), sim.gpio(pins), TokioDelay, &config)
        .await
        .context("creating device")?;
    info!("Device {} ready", prism.info());

    let a = V256::set8_i32(1, -2, 3, -4, 100, 200, 300, i32::MAX);
    let b = V256::set8_i32(10, 20, 30, 40, -50, -60, -70, 1);
    prism.store_bank(&a, Bank::A, TIMEOUT).await?;
    prism.store_bank(&b, Bank::B, TIMEOUT).await?;

    let checks: [(&str, [i32; 8]); 3] = [
        ("add", [11, 18, 33, 36, 50, 140, 230, i32::MIN]),
        ("sub", [-9, -22, -27, -44, 150, 260, 370, i32::MAX - 1]),
        // comparisons are unsigned
        ("gt", [0, -1, 0, -1, 0, 0, 0, -1]),
    ];

    let mut failures = 0;
    for (name, expected) in checks {
        match name {
            "add" => prism.add(8, ElementType::I32, TIMEOUT).await?,
            "sub" => prism.sub(8, ElementType::I32, TIMEOUT).await?,
            _ => prism.compare(Compare::Gt, 8, TIMEOUT).await?,
        }
        let c = prism.load_bank(Bank::C, TIMEOUT).await?.to_i32();
        if c == expected {
            info!("{}: ok {:?}", name, c);
        } else {
            error!("{}: got {:?}, expected {:?}", name, c, expected);
            failures += 1;
        }
    }

    prism.stop().await?;
    ensure!(failures == 0, "{} check(s) failed", failures);
    info!("Self-test passed.");
    Ok(())
}
