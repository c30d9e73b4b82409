use tracing::{debug, info};

use crate::config::PvConfig;
use crate::energy::EnergyIntegrator;
use crate::utils::{elapsed_ms, Millis};

/// Production phase of the PV string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayPhase {
    Day,
    Night {
        since: Millis,
        /// Latched once the dark period has been exceeded this night.
        reset_eligible: bool,
    },
}

/// Integrates PV production during the day and starts a new production day
/// at the first sunrise after a long enough night.
///
/// Darkness shorter than the dark period (heavy shading, storms) keeps the
/// running counter.
#[derive(Debug, Clone)]
pub struct PvProductionTracker {
    phase: DayPhase,
    integrator: EnergyIntegrator,
    night_threshold_v: f64,
    dark_period_ms: Millis,
}

impl PvProductionTracker {
    pub fn new(night_threshold_v: f64, dark_period_ms: Millis) -> Self {
        Self {
            phase: DayPhase::Day,
            integrator: EnergyIntegrator::new(),
            night_threshold_v,
            dark_period_ms,
        }
    }

    pub fn from_config(cfg: &PvConfig) -> Self {
        let dark_period_ms = (cfg.dark_period_hours * 3_600_000.0).clamp(0.0, Millis::MAX as f64);
        Self::new(cfg.night_threshold_v, dark_period_ms as Millis)
    }

    pub fn phase(&self) -> DayPhase {
        self.phase
    }

    /// Advances the day/night machine and returns the updated production
    /// counter (Wh).
    pub fn update(
        &mut self,
        produced_wh: f64,
        pv_voltage: f64,
        pv_current: f64,
        pv_power: f64,
        now: Millis,
    ) -> f64 {
        if pv_voltage <= self.night_threshold_v {
            self.phase = match self.phase {
                DayPhase::Day => {
                    debug!(pv_voltage, "PV below threshold, night started");
                    DayPhase::Night {
                        since: now,
                        reset_eligible: false,
                    }
                }
                DayPhase::Night {
                    since,
                    reset_eligible,
                } => {
                    let eligible =
                        reset_eligible || elapsed_ms(since, now) >= self.dark_period_ms;
                    if eligible && !reset_eligible {
                        info!(
                            dark_hours = self.dark_period_ms as f64 / 3_600_000.0,
                            "prolonged darkness, PV counter will reset at sunrise"
                        );
                    }
                    DayPhase::Night {
                        since,
                        reset_eligible: eligible,
                    }
                }
            };
            self.integrator.anchor(now);
            return produced_wh;
        }

        let mut produced_wh = produced_wh;
        if let DayPhase::Night { reset_eligible, .. } = self.phase {
            if reset_eligible {
                info!(previous_wh = produced_wh, "sunrise after a full night, PV counter reset");
                produced_wh = 0.0;
            } else {
                debug!(pv_voltage, "sunrise before dark period elapsed, keeping PV counter");
            }
            self.phase = DayPhase::Day;
        }

        let power = if pv_power > 0.0 {
            pv_power
        } else {
            pv_voltage * pv_current
        };
        self.integrator.integrate(produced_wh, power, now)
    }
}
