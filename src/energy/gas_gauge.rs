use tracing::{debug, info};

use crate::config::BatteryConfig;
use crate::energy::EnergyIntegrator;
use crate::utils::Millis;

/// Result of one gas-gauge step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaugeReading {
    pub energy_wh: f64,
    pub percent: f64,
    pub boundary: Option<Boundary>,
}

/// Hard voltage reference point hit this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Empty,
    Full,
}

/// Energy-integrating state-of-charge estimator.
///
/// Integrates `V * (I_charge - I_discharge)` between the empty and full
/// voltage references; reaching either reference snaps the gauge to 0 % or
/// 100 % and recalibrates away accumulated drift.
#[derive(Debug, Clone)]
pub struct BatteryGasGauge {
    integrator: EnergyIntegrator,
    maximum_energy_wh: f64,
    minimum_voltage: f64,
    maximum_voltage: f64,
    last_boundary: Option<Boundary>,
}

impl BatteryGasGauge {
    pub fn new(maximum_energy_wh: f64, minimum_voltage: f64, maximum_voltage: f64) -> Self {
        Self {
            integrator: EnergyIntegrator::new(),
            maximum_energy_wh,
            minimum_voltage,
            maximum_voltage,
            last_boundary: None,
        }
    }

    pub fn from_config(cfg: &BatteryConfig) -> Self {
        Self::new(cfg.maximum_energy_wh, cfg.minimum_voltage, cfg.maximum_voltage)
    }

    pub fn maximum_energy_wh(&self) -> f64 {
        self.maximum_energy_wh
    }

    pub fn update(
        &mut self,
        energy_wh: f64,
        corrected_voltage: f64,
        charge_current: f64,
        discharge_current: f64,
        now: Millis,
    ) -> GaugeReading {
        if corrected_voltage <= self.minimum_voltage {
            self.integrator.anchor(now);
            self.note_boundary(Boundary::Empty, corrected_voltage);
            return GaugeReading {
                energy_wh: 0.0,
                percent: 0.0,
                boundary: Some(Boundary::Empty),
            };
        }

        if corrected_voltage >= self.maximum_voltage {
            self.integrator.anchor(now);
            self.note_boundary(Boundary::Full, corrected_voltage);
            return GaugeReading {
                energy_wh: self.maximum_energy_wh,
                percent: 100.0,
                boundary: Some(Boundary::Full),
            };
        }
        self.last_boundary = None;

        let net_current = charge_current - discharge_current;
        let energy_wh = self
            .integrator
            .integrate(energy_wh, corrected_voltage * net_current, now);
        let percent = if self.maximum_energy_wh > 0.0 {
            (100.0 * energy_wh / self.maximum_energy_wh).clamp(0.0, 100.0)
        } else {
            0.0
        };
        debug!(energy_wh, percent, net_current, "gas gauge integrated");

        GaugeReading {
            energy_wh,
            percent,
            boundary: None,
        }
    }

    // Logged once per excursion, not every cycle spent at the boundary.
    fn note_boundary(&mut self, boundary: Boundary, voltage: f64) {
        if self.last_boundary != Some(boundary) {
            match boundary {
                Boundary::Empty => info!(voltage, "battery depleted, gas gauge reset to 0%"),
                Boundary::Full => info!(voltage, "battery full, gas gauge reset to 100%"),
            }
        }
        self.last_boundary = Some(boundary);
    }
}

/// Memoryless voltage-based state of charge over the linear range
/// `[min_voltage, max_voltage]`, clamped to 0..=100.
pub fn voltage_soc(voltage: f64, min_voltage: f64, max_voltage: f64) -> f64 {
    let span = max_voltage - min_voltage;
    if span <= 0.0 {
        return 0.0;
    }
    ((voltage - min_voltage) / span * 100.0).clamp(0.0, 100.0)
}
