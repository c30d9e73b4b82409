use tracing::debug;

use crate::config::AutonomyConfig;
use crate::utils::{dynamic_alpha, Ewma};

/// Inputs of one autonomy step.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutonomyInput {
    pub battery_energy_wh: f64,
    pub ac_output_watts: f64,
    pub efficiency_percent: f64,
    pub poll_interval_secs: f64,
}

/// Remaining battery runtime at the smoothed load.
#[derive(Debug, Clone)]
pub struct AutonomyEstimator {
    efficiency: Ewma,
    watts: Ewma,
    efficiency_cap_percent: f64,
    window_minutes: f64,
    max_minutes: u32,
}

impl AutonomyEstimator {
    pub fn new(efficiency_cap_percent: f64, window_minutes: f64, max_days: u32) -> Self {
        Self {
            efficiency: Ewma::new(),
            watts: Ewma::new(),
            efficiency_cap_percent,
            window_minutes,
            max_minutes: max_days.saturating_mul(24 * 60),
        }
    }

    pub fn from_config(cfg: &AutonomyConfig) -> Self {
        Self::new(cfg.efficiency_cap_percent, cfg.window_minutes, cfg.max_days)
    }

    /// Cap reported when no discharge is in progress.
    pub fn max_minutes(&self) -> u32 {
        self.max_minutes
    }

    pub fn smoothed_efficiency(&self) -> Option<f64> {
        self.efficiency.value()
    }

    pub fn smoothed_watts(&self) -> Option<f64> {
        self.watts.value()
    }

    /// Returns the autonomy in minutes.
    pub fn update(&mut self, input: AutonomyInput) -> u32 {
        let sourcing = input.battery_energy_wh > 0.0
            && input.ac_output_watts > 0.0
            && input.efficiency_percent > 0.0;
        if !sourcing {
            return self.max_minutes;
        }

        let alpha = dynamic_alpha(input.poll_interval_secs, self.window_minutes);
        let capped_efficiency = input.efficiency_percent.min(self.efficiency_cap_percent);
        let eff = self.efficiency.update(capped_efficiency, alpha);
        let watts = self.watts.update(input.ac_output_watts, alpha);

        let dc_watts = if eff > 0.0 { watts / (eff / 100.0) } else { 0.0 };
        let hours_remaining = if dc_watts > 0.0 {
            input.battery_energy_wh / dc_watts
        } else {
            0.0
        };

        let minutes = (hours_remaining * 60.0).min(self.max_minutes as f64) as u32;
        debug!(alpha, eff, watts, dc_watts, hours_remaining, minutes, "autonomy updated");
        minutes
    }
}
