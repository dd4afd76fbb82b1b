//! Delay abstraction.

use async_trait::async_trait;
use std::time::Duration;

/// Blocking-style waits used by the wire protocols.
///
/// Implementations must wait *at least* the requested time.
#[async_trait]
pub trait Delay: Send + Sync {
    async fn delay_us(&mut self, us: u32);

    async fn delay_ms(&mut self, ms: u32) {
        self.delay_us(ms.saturating_mul(1000)).await;
    }
}

/// Delay backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn delay_us(&mut self, us: u32) {
        tokio::time::sleep(Duration::from_micros(us as u64)).await;
    }

    async fn delay_ms(&mut self, ms: u32) {
        tokio::time::sleep(Duration::from_millis(ms as u64)).await;
    }
}
