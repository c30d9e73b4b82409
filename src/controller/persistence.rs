use tracing::{debug, warn};

use crate::config::SaveThresholds;
use crate::storage::{EnergyRecord, EnergyStore, StoreError};

/// Outcome of one gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// First evaluation; the baseline was captured, nothing written.
    Baseline,
    Unchanged,
    Saved,
}

/// Rate-limits flash writes: the record is persisted only when some field has
/// moved by at least its threshold since the last successful save.
#[derive(Debug, Clone)]
pub struct PersistenceGate {
    thresholds: SaveThresholds,
    baseline: Option<EnergyRecord>,
}

impl PersistenceGate {
    pub fn new(thresholds: SaveThresholds) -> Self {
        Self {
            thresholds,
            baseline: None,
        }
    }

    pub fn baseline(&self) -> Option<&EnergyRecord> {
        self.baseline.as_ref()
    }

    pub fn evaluate<S: EnergyStore + ?Sized>(
        &mut self,
        store: &mut S,
        current: &EnergyRecord,
        force: bool,
    ) -> Result<GateDecision, StoreError> {
        let baseline = match self.baseline {
            None if !force => {
                self.baseline = Some(*current);
                return Ok(GateDecision::Baseline);
            }
            None => None,
            Some(b) => Some(b),
        };

        let changed = baseline.map_or(true, |b| self.exceeds(&b, current));
        if !force && !changed {
            return Ok(GateDecision::Unchanged);
        }

        if let Err(e) = store.save(&current.to_entries()) {
            warn!(error = %e, "failed to persist energy counters");
            return Err(e);
        }
        self.baseline = Some(*current);
        debug!(
            pv_wh = current.pv_energy_wh,
            battery_wh = current.battery_energy_wh,
            gas_gauge = current.gas_gauge_percent,
            ac_wh = current.ac_energy_wh,
            force,
            "energy counters persisted"
        );
        Ok(GateDecision::Saved)
    }

    fn exceeds(&self, baseline: &EnergyRecord, current: &EnergyRecord) -> bool {
        let t = &self.thresholds;
        (current.pv_energy_wh - baseline.pv_energy_wh).abs() >= t.pv_wh
            || (current.battery_energy_wh - baseline.battery_energy_wh).abs() >= t.battery_wh
            || (current.gas_gauge_percent - baseline.gas_gauge_percent).abs() >= t.gas_gauge_percent
            || (current.ac_energy_wh - baseline.ac_energy_wh).abs() >= t.ac_wh
    }
}
