use anyhow::Result;
use figment::{providers::{Env, Format, Serialized, Toml}, Figment};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::modbus::register_map;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: BusConfig,
    pub battery: BatteryConfig,
    pub pv: PvConfig,
    pub autonomy: AutonomyConfig,
    pub poll: PollConfig,
    pub persistence: PersistenceConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Sim,
    Tcp,
    Rtu,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub kind: BusKind,
    pub tcp_addr: String,
    pub serial_path: String,
    pub baud_rate: u32,
    pub unit_id: u8,
    /// Per-attempt timeout handed to the Modbus client.
    pub timeout_ms: u64,
    pub base_address: u16,
    pub register_count: u16,
    pub chunk_size: u16,
    pub retry_count: u8,
    pub chunk_delay_us: u64,
    /// Some devices report every word byte-swapped.
    pub swap_bytes: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            kind: BusKind::Sim,
            tcp_addr: "127.0.0.1:502".into(),
            serial_path: "/dev/ttyUSB0".into(),
            baud_rate: 2400,
            unit_id: 5,
            timeout_ms: 1000,
            base_address: register_map::BASE_ADDRESS,
            register_count: register_map::REGISTER_COUNT,
            chunk_size: 3,
            retry_count: 4,
            chunk_delay_us: 10,
            swap_bytes: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub maximum_energy_wh: f64,
    /// At or below this corrected voltage the pack is treated as empty.
    pub minimum_voltage: f64,
    /// At or above this corrected voltage the pack is treated as full.
    pub maximum_voltage: f64,
    /// Linear range used by the voltage-based SOC.
    pub soc_min_voltage: f64,
    pub soc_max_voltage: f64,
    pub initial_compensation_k: f64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            maximum_energy_wh: 2560.0, // 12.8 V x 100 Ah x 2
            minimum_voltage: 22.0,
            maximum_voltage: 28.8,
            soc_min_voltage: 23.0,
            soc_max_voltage: 28.8,
            initial_compensation_k: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PvConfig {
    /// Raw (unscaled) PV voltage below which the reading is treated as noise.
    pub noise_floor_raw: u16,
    pub night_threshold_v: f64,
    pub dark_period_hours: f64,
}

impl Default for PvConfig {
    fn default() -> Self {
        Self {
            noise_floor_raw: 60,
            night_threshold_v: 30.0,
            dark_period_hours: 6.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutonomyConfig {
    pub max_days: u32,
    pub efficiency_cap_percent: f64,
    pub window_minutes: f64,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            max_days: 2,
            efficiency_cap_percent: 93.0,
            window_minutes: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub initial_interval_secs: f64,
    pub min_interval_secs: f64,
    pub max_interval_secs: f64,
    pub interval_step_secs: f64,
    pub max_failures: u8,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval_secs: 5.0,
            min_interval_secs: 5.0,
            max_interval_secs: 30.0,
            interval_step_secs: 5.0,
            max_failures: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub path: PathBuf,
    pub thresholds: SaveThresholds,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/energy.json"),
            thresholds: SaveThresholds::default(),
        }
    }
}

/// Minimum change per field that triggers a flush.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveThresholds {
    pub pv_wh: f64,
    pub battery_wh: f64,
    pub gas_gauge_percent: f64,
    pub ac_wh: f64,
}

impl Default for SaveThresholds {
    fn default() -> Self {
        Self {
            pv_wh: 5.0,
            battery_wh: 5.0,
            gas_gauge_percent: 5.0,
            ac_wh: 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("IEM__").split("__"));
        Ok(figment.extract()?)
    }
}
