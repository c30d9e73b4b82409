use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BusConfig;

/// Transport errors surfaced to the poll cycle
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("chunk at register {address} ({count} words) failed after {attempts} attempts: {last_error}")]
    ChunkFailed {
        address: u16,
        count: u16,
        attempts: u8,
        last_error: String,
    },
    #[error("short response at register {address}: expected {expected} words, got {got}")]
    ShortResponse { address: u16, expected: u16, got: usize },
}

/// One "read N holding registers at A" request, no retries.
#[async_trait]
pub trait RegisterBus: Send {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> anyhow::Result<Vec<u16>>;
}

#[async_trait]
impl RegisterBus for Box<dyn RegisterBus> {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> anyhow::Result<Vec<u16>> {
        (**self).read_holding_registers(address, count).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransportSettings {
    pub chunk_size: u16,
    pub retry_count: u8,
    /// Bus settle time between attempts and between chunks.
    pub settle_delay: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            chunk_size: 3,
            retry_count: 4,
            settle_delay: Duration::from_micros(10),
        }
    }
}

impl From<&BusConfig> for TransportSettings {
    fn from(cfg: &BusConfig) -> Self {
        Self {
            chunk_size: cfg.chunk_size,
            retry_count: cfg.retry_count,
            settle_delay: Duration::from_micros(cfg.chunk_delay_us),
        }
    }
}

/// Reads a contiguous register block as a sequence of small, retried chunks.
///
/// A chunk that exhausts its attempts aborts the whole block; partial data is
/// never returned.
pub struct RegisterTransport<B> {
    bus: B,
    settings: TransportSettings,
}

impl<B: RegisterBus> RegisterTransport<B> {
    pub fn new(bus: B, settings: TransportSettings) -> Self {
        Self { bus, settings }
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub async fn read_block(&mut self, start: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        let chunk_size = self.settings.chunk_size.max(1);
        let mut words = Vec::with_capacity(count as usize);
        let mut address = start;
        let mut remaining = count;

        while remaining > 0 {
            let n = chunk_size.min(remaining);
            let chunk = self.read_chunk(address, n).await?;
            words.extend_from_slice(&chunk);

            remaining -= n;
            address = address.wrapping_add(n);
            if remaining > 0 {
                self.settle().await;
            }
        }

        Ok(words)
    }

    /// Pause between requests. Timers have millisecond resolution, so shorter
    /// delays only yield to the scheduler instead of rounding up to 1 ms.
    async fn settle(&self) {
        let delay = self.settings.settle_delay;
        if delay.is_zero() {
            return;
        }
        if delay < Duration::from_millis(1) {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
    }

    async fn read_chunk(&mut self, address: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        let max_attempts = self.settings.retry_count.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.bus.read_holding_registers(address, count).await {
                Ok(mut chunk) if chunk.len() >= count as usize => {
                    if attempt > 1 {
                        debug!(address, attempt, "chunk read succeeded after retry");
                    }
                    chunk.truncate(count as usize);
                    return Ok(chunk);
                }
                Ok(chunk) => {
                    last_error = TransportError::ShortResponse {
                        address,
                        expected: count,
                        got: chunk.len(),
                    }
                    .to_string();
                }
                Err(e) => {
                    last_error = format!("{:#}", e);
                }
            }

            debug!(address, attempt, error = %last_error, "chunk read attempt failed");
            if attempt < max_attempts {
                self.settle().await;
            }
        }

        warn!(address, count, attempts = max_attempts, "chunk read exhausted retries");
        Err(TransportError::ChunkFailed {
            address,
            count,
            attempts: max_attempts,
            last_error,
        })
    }
}
