use serde::{Deserialize, Serialize};

/// AC side of the inverter, refreshed every successful cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AcSample {
    pub input_voltage: f64,
    pub input_freq: f64,
    pub output_voltage: f64,
    pub output_freq: f64,
    pub output_va: f64,
    pub output_watts: f64,
    pub output_load_percent: f64,
    pub power_factor: f64,
}

/// DC side: PV string and battery.
///
/// The `*_prev` fields hold the previous cycle's value and are rolled at the
/// end of each successful cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DcSample {
    pub pv_voltage: f64,
    pub pv_power: f64,
    pub pv_current: f64,
    pub pv_energy_produced_wh: f64,
    pub battery_voltage: f64,
    pub battery_voltage_prev: f64,
    pub battery_voltage_corrected: f64,
    pub charge_current: f64,
    pub charge_current_prev: f64,
    pub discharge_current: f64,
    pub discharge_current_prev: f64,
    pub charge_power: f64,
    pub discharge_power: f64,
    pub compensation_k: f64,
}

impl DcSample {
    pub fn roll_previous(&mut self) {
        self.battery_voltage_prev = self.battery_voltage;
        self.charge_current_prev = self.charge_current;
        self.discharge_current_prev = self.discharge_current;
    }
}

/// Best-effort reading of the device's operating-mode register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingMode {
    OnBattery,
    OnGrid,
    Other(u16),
}

impl From<u16> for OperatingMode {
    fn from(code: u16) -> Self {
        match code {
            3 => OperatingMode::OnBattery,
            4 => OperatingMode::OnGrid,
            other => OperatingMode::Other(other),
        }
    }
}

impl Default for OperatingMode {
    fn default() -> Self {
        OperatingMode::Other(0)
    }
}

impl std::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatingMode::OnBattery => write!(f, "on_battery"),
            OperatingMode::OnGrid => write!(f, "on_grid"),
            OperatingMode::Other(code) => write!(f, "mode_{}", code),
        }
    }
}

/// Inverter-level state and every derived estimate.
///
/// `instantaneous_soc_percent` (voltage based, memoryless) and
/// `gas_gauge_percent` (energy integrated, persisted) are independent
/// estimators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InverterState {
    pub temperature: f64,
    pub operating_mode_code: u16,
    pub operating_mode: OperatingMode,
    pub charger_code: u16,
    pub efficiency_percent: f64,
    pub instantaneous_soc_percent: f64,
    pub valid: bool,
    pub read_time_seconds: f64,
    pub read_time_mean_seconds: f64,
    pub battery_energy_wh: f64,
    pub gas_gauge_percent: f64,
    pub energy_spent_ac_wh: f64,
    pub energy_source_ac_percent: f64,
    pub energy_source_batt_percent: f64,
    pub energy_source_pv_percent: f64,
    pub autonomy_minutes: u32,
}

impl InverterState {
    /// Zeroed state with autonomy at its cap.
    pub fn new(autonomy_cap_minutes: u32) -> Self {
        Self {
            temperature: 0.0,
            operating_mode_code: 0,
            operating_mode: OperatingMode::default(),
            charger_code: 0,
            efficiency_percent: 0.0,
            instantaneous_soc_percent: 0.0,
            valid: false,
            read_time_seconds: 0.0,
            read_time_mean_seconds: 0.0,
            battery_energy_wh: 0.0,
            gas_gauge_percent: 0.0,
            energy_spent_ac_wh: 0.0,
            energy_source_ac_percent: 0.0,
            energy_source_batt_percent: 0.0,
            energy_source_pv_percent: 0.0,
            autonomy_minutes: autonomy_cap_minutes,
        }
    }
}

/// The complete, process-lifetime data model mutated by the poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataModel {
    pub ac: AcSample,
    pub dc: DcSample,
    pub inverter: InverterState,
}

impl DataModel {
    pub fn new(initial_k: f64, autonomy_cap_minutes: u32) -> Self {
        Self {
            ac: AcSample::default(),
            dc: DcSample {
                compensation_k: initial_k,
                ..DcSample::default()
            },
            inverter: InverterState::new(autonomy_cap_minutes),
        }
    }
}

/// Read-only view published after every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub ac: AcSample,
    pub dc: DcSample,
    pub inverter: InverterState,
    pub poll_interval_secs: f64,
    pub consecutive_failures: u8,
    pub uptime_secs: u64,
    pub taken_at: chrono::DateTime<chrono::Utc>,
}
