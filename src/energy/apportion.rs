use serde::{Deserialize, Serialize};

/// Assumed conversion efficiency of the PV and battery paths.
const PV_EFFICIENCY: f64 = 0.80;
const DC_EFFICIENCY: f64 = 0.80;
/// AC input above this voltage counts as grid present.
const GRID_PRESENT_V: f64 = 100.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct SourceInput {
    pub ac_input_voltage: f64,
    pub ac_output_watts: f64,
    pub pv_power: f64,
    pub charge_power: f64,
    pub discharge_power: f64,
}

/// Share of the AC output attributed to each source, each in 0..=100.
///
/// Best-effort only: the three shares are not guaranteed to sum to 100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergySources {
    pub ac_percent: f64,
    pub batt_percent: f64,
    pub pv_percent: f64,
}

/// Splits the AC output between grid, battery and PV.
pub fn apportion(input: &SourceInput) -> EnergySources {
    let mut sources = EnergySources::default();
    let out = input.ac_output_watts;
    if out <= 0.0 {
        return sources;
    }

    let has_ac = input.ac_input_voltage > GRID_PRESENT_V;
    let has_pv = input.pv_power > 0.0;

    match (has_ac, has_pv) {
        (true, false) => {
            sources.ac_percent = 100.0;
        }
        (false, false) => {
            if input.discharge_power > 0.0 {
                sources.batt_percent = 100.0;
            }
        }
        (true, true) => {
            let pv_available = (input.pv_power - input.charge_power).max(0.0);
            let pv_contribution = pv_available * PV_EFFICIENCY;
            let ac_contribution = (out - pv_contribution).max(0.0);
            sources.pv_percent = pv_contribution / out * 100.0;
            sources.ac_percent = ac_contribution / out * 100.0;
        }
        (false, true) => {
            let pv_contribution = input.pv_power * PV_EFFICIENCY;
            let batt_contribution = if input.discharge_power > 0.0 {
                input.discharge_power * DC_EFFICIENCY
            } else {
                0.0
            };
            let total = pv_contribution + batt_contribution;
            if total > 0.0 {
                sources.pv_percent = pv_contribution / total * 100.0;
                sources.batt_percent = batt_contribution / total * 100.0;
            }
        }
    }

    EnergySources {
        ac_percent: sources.ac_percent.clamp(0.0, 100.0),
        batt_percent: sources.batt_percent.clamp(0.0, 100.0),
        pv_percent: sources.pv_percent.clamp(0.0, 100.0),
    }
}
