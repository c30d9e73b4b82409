use tracing::debug;

use crate::domain::DcSample;

/// Net current swing (A) below which the resistance estimate is ill-conditioned.
const MIN_CURRENT_CHANGE_A: f64 = 5.0;
/// Blend factor for each new resistance estimate.
const ADAPTATION_GAIN: f64 = 0.1;

/// Estimates the resistive drop between the measurement point and the battery
/// terminals and corrects the measured voltage for it.
///
/// `V_corrected = V - k * I_charge + k * I_discharge`
///
/// `k` is learned from consecutive samples whose net current differs by more
/// than 5 A. It is never decayed or persisted.
#[derive(Debug, Clone, Copy)]
pub struct VoltageCompensator {
    k: f64,
}

impl VoltageCompensator {
    pub fn new(initial_k: f64) -> Self {
        Self { k: initial_k }
    }

    pub fn k(&self) -> f64 {
        self.k
    }

    /// Refines `k` from the step between the previous and current sample and
    /// returns the corrected battery voltage.
    ///
    /// `previous_valid` must be true only when `dc`'s `*_prev` fields come
    /// from a successful cycle.
    pub fn update(&mut self, dc: &DcSample, previous_valid: bool) -> f64 {
        let net_current_change = -(dc.discharge_current - dc.discharge_current_prev)
            + (dc.charge_current - dc.charge_current_prev);

        if previous_valid && net_current_change.abs() > MIN_CURRENT_CHANGE_A {
            let new_k = (dc.battery_voltage - dc.battery_voltage_prev) / net_current_change;
            self.k += ADAPTATION_GAIN * (new_k - self.k);
            debug!(new_k, k = self.k, net_current_change, "compensation coefficient updated");
        }

        self.correct(dc.battery_voltage, dc.charge_current, dc.discharge_current)
    }

    pub fn correct(&self, voltage: f64, charge_current: f64, discharge_current: f64) -> f64 {
        voltage - self.k * charge_current + self.k * discharge_current
    }
}

impl Default for VoltageCompensator {
    fn default() -> Self {
        Self::new(0.01)
    }
}
