use crate::utils::{elapsed_ms, ms_to_hours, Millis};

/// Power-to-energy accumulator over a wrapping millisecond clock.
///
/// The first call only anchors the timestamp. Each later call adds
/// `power * elapsed_hours` (Wh) to the accumulator and clamps it at zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnergyIntegrator {
    last_timestamp: Millis,
    anchored: bool,
}

impl EnergyIntegrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn integrate(&mut self, accumulator_wh: f64, power_w: f64, now: Millis) -> f64 {
        if !self.anchored {
            self.anchor(now);
            return accumulator_wh;
        }

        let elapsed = elapsed_ms(self.last_timestamp, now);
        self.last_timestamp = now;

        let delta_wh = power_w * ms_to_hours(elapsed);
        (accumulator_wh + delta_wh).max(0.0)
    }

    /// Restarts the interval at `now` without accumulating anything.
    pub fn anchor(&mut self, now: Millis) {
        self.last_timestamp = now;
        self.anchored = true;
    }

    pub fn last_timestamp(&self) -> Option<Millis> {
        self.anchored.then_some(self.last_timestamp)
    }
}
