#[cfg(feature = "modbus")]
pub mod client {
    use anyhow::{Context as AnyhowContext, Result};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_modbus::client::tcp;
    use tokio_modbus::prelude::*;
    use tracing::{debug, warn};

    use crate::hardware::RegisterBus;

    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

    #[derive(Debug, Clone)]
    enum Endpoint {
        Tcp(String),
        #[cfg(feature = "modbus-rtu")]
        Rtu { path: String, baud_rate: u32 },
    }

    /// Single-attempt Modbus client. Retries and chunking live in
    /// [`crate::hardware::RegisterTransport`]; this type only performs one
    /// request per call and drops the connection after an I/O failure so the
    /// next call reconnects.
    pub struct ModbusClient {
        context: Option<tokio_modbus::client::Context>,
        endpoint: Endpoint,
        unit_id: u8,
        timeout_duration: Duration,
    }

    impl ModbusClient {
        /// Connect to a Modbus TCP device with default timeout
        pub async fn connect(addr: &str, unit_id: u8) -> Result<Self> {
            Self::connect_with_timeout(addr, unit_id, DEFAULT_TIMEOUT).await
        }

        /// Connect to a Modbus TCP device with custom timeout
        pub async fn connect_with_timeout(
            addr: &str,
            unit_id: u8,
            timeout_duration: Duration,
        ) -> Result<Self> {
            let mut client = Self {
                context: None,
                endpoint: Endpoint::Tcp(addr.to_string()),
                unit_id,
                timeout_duration,
            };
            client.reconnect().await?;
            Ok(client)
        }

        /// Open a serial line and talk Modbus RTU over it
        #[cfg(feature = "modbus-rtu")]
        pub async fn open_rtu(
            path: &str,
            baud_rate: u32,
            unit_id: u8,
            timeout_duration: Duration,
        ) -> Result<Self> {
            let mut client = Self {
                context: None,
                endpoint: Endpoint::Rtu {
                    path: path.to_string(),
                    baud_rate,
                },
                unit_id,
                timeout_duration,
            };
            client.reconnect().await?;
            Ok(client)
        }

        /// (Re)establish the underlying connection
        pub async fn reconnect(&mut self) -> Result<()> {
            let ctx = match &self.endpoint {
                Endpoint::Tcp(addr) => {
                    let socket_addr = addr.parse().context("Invalid address format")?;
                    debug!("Connecting to Modbus device at {} (unit {})", addr, self.unit_id);
                    let mut ctx = timeout(self.timeout_duration, tcp::connect(socket_addr))
                        .await
                        .context("Connection timeout")?
                        .context("Failed to connect")?;
                    ctx.set_slave(Slave(self.unit_id));
                    ctx
                }
                #[cfg(feature = "modbus-rtu")]
                Endpoint::Rtu { path, baud_rate } => {
                    use tokio_serial::SerialPortBuilderExt;

                    debug!("Opening serial port {} @{} baud (unit {})", path, baud_rate, self.unit_id);
                    let port = tokio_serial::new(path, *baud_rate)
                        .data_bits(tokio_serial::DataBits::Eight)
                        .parity(tokio_serial::Parity::None)
                        .stop_bits(tokio_serial::StopBits::One)
                        .timeout(self.timeout_duration)
                        .open_native_async()
                        .with_context(|| format!("Failed to open serial port {}", path))?;
                    tokio_modbus::client::rtu::attach_slave(port, Slave(self.unit_id))
                }
            };
            self.context = Some(ctx);
            Ok(())
        }
    }

    #[async_trait]
    impl RegisterBus for ModbusClient {
        async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
            if self.context.is_none() {
                self.reconnect().await?;
            }
            let ctx = self
                .context
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("Modbus context unavailable"))?;

            match timeout(self.timeout_duration, ctx.read_holding_registers(address, count)).await {
                Ok(Ok(words)) => Ok(words),
                Ok(Err(e)) => {
                    // Exception replies arrive as `Other`; the framing is still in sync.
                    if e.kind() == std::io::ErrorKind::Other {
                        debug!("Modbus device rejected read at {}: {}", address, e);
                    } else {
                        warn!("Modbus read at {} failed: {}", address, e);
                        self.context = None;
                    }
                    Err(anyhow::Error::new(e)
                        .context(format!("Failed to read holding registers at {}", address)))
                }
                Err(_) => {
                    // A late reply would otherwise answer the next request.
                    warn!("Modbus read at {} timed out, dropping connection", address);
                    self.context = None;
                    Err(anyhow::anyhow!(
                        "Modbus read at {} timed out after {:?}",
                        address,
                        self.timeout_duration
                    ))
                }
            }
        }
    }
}

/// Holding-register layout of the inverter.
pub mod register_map {
    /// First register of the status block.
    pub const BASE_ADDRESS: u16 = 4501;
    /// Words in the status block (4501..=4561).
    pub const REGISTER_COUNT: u16 = 61;

    // Offsets relative to BASE_ADDRESS
    pub const OP_MODE: usize = 0;
    pub const AC_INPUT_VOLTAGE: usize = 1;
    pub const AC_INPUT_FREQ: usize = 2;
    pub const PV_VOLTAGE: usize = 3;
    pub const PV_POWER: usize = 4;
    pub const BATTERY_VOLTAGE: usize = 5;
    pub const CHARGE_CURRENT: usize = 7;
    pub const DISCHARGE_CURRENT: usize = 8;
    pub const AC_OUTPUT_VOLTAGE: usize = 9;
    pub const AC_OUTPUT_FREQ: usize = 10;
    pub const AC_OUTPUT_VA: usize = 11;
    pub const AC_OUTPUT_WATTS: usize = 12;
    pub const AC_OUTPUT_LOAD_PERCENT: usize = 13;
    pub const CHARGER_CODE: usize = 54;
    pub const TEMPERATURE: usize = 56;

    /// Voltages and frequencies are reported in tenths.
    pub const DECI_DIVISOR: f64 = 10.0;
    /// Currents, powers and percentages are reported in whole units.
    pub const UNIT_DIVISOR: f64 = 1.0;
}

/// Modbus data parsing utilities
pub mod parser {
    use byteorder::{BigEndian, ByteOrder, LittleEndian};

    /// Byte order of a register word as delivered by the device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum WordOrder {
        #[default]
        BigEndian,
        Swapped,
    }

    /// Word at `offset`, zero if the block is too short.
    pub fn word_at(registers: &[u16], offset: usize, order: WordOrder) -> u16 {
        let raw = registers.get(offset).copied().unwrap_or(0);
        let bytes = raw.to_be_bytes();
        match order {
            WordOrder::BigEndian => BigEndian::read_u16(&bytes),
            WordOrder::Swapped => LittleEndian::read_u16(&bytes),
        }
    }

    /// Parse a fixed-point u16 value (`raw / divisor`)
    pub fn parse_scaled_u16(raw: u16, divisor: f64) -> f64 {
        raw as f64 / divisor
    }

}
