use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::time::{Duration, Instant};

use crate::hardware::RegisterBus;
use crate::modbus::register_map as reg;

/// Simulated hybrid inverter serving the status block.
///
/// Runs a compressed day (sun up for the first half of `day_length`), an
/// off-grid household load, and a battery whose voltage follows its charge.
/// A configurable share of requests fail to exercise the retry path.
pub struct SimulatedInverterBus {
    rng: StdRng,
    started: Instant,
    last_frame_at: Instant,
    day_length: Duration,
    failure_rate: f64,
    base_address: u16,
    /// Internal battery charge, 0.0..=1.0
    charge: f64,
    capacity_wh: f64,
    frame: Vec<u16>,
}

impl SimulatedInverterBus {
    pub fn new(base_address: u16) -> Self {
        Self::with_rng(base_address, StdRng::from_entropy())
    }

    pub fn with_rng(base_address: u16, rng: StdRng) -> Self {
        let now = Instant::now();
        Self {
            rng,
            started: now,
            last_frame_at: now,
            day_length: Duration::from_secs(20 * 60),
            failure_rate: 0.02,
            base_address,
            charge: 0.6,
            capacity_wh: 2560.0,
            frame: vec![0; reg::REGISTER_COUNT as usize],
        }
    }

    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = failure_rate.clamp(0.0, 1.0);
        self
    }

    /// Sun intensity 0..=1 for the current point of the simulated day.
    fn sun(&self) -> f64 {
        let day = self.day_length.as_secs_f64();
        let phase = (self.started.elapsed().as_secs_f64() % day) / day;
        (phase * 2.0 * PI).sin().max(0.0)
    }

    fn refresh_frame(&mut self) {
        let now = Instant::now();
        let dt_h = now.duration_since(self.last_frame_at).as_secs_f64() / 3600.0;
        self.last_frame_at = now;

        let sun = self.sun();
        let pv_voltage = if sun > 0.05 { 60.0 + 90.0 * sun } else { 0.0 };
        let pv_power = (1800.0 * sun).round();
        let load = (350.0 + self.rng.gen_range(-80.0..80.0_f64)).round();

        // Battery absorbs the surplus and covers the deficit (90% efficient).
        let battery_voltage_rest = 23.5 + 5.0 * self.charge;
        let net_dc = pv_power * 0.9 - load / 0.9;
        let (charge_a, discharge_a) = if net_dc >= 0.0 {
            ((net_dc / battery_voltage_rest).round(), 0.0)
        } else {
            (0.0, (-net_dc / battery_voltage_rest).round())
        };
        self.charge = (self.charge + net_dc * dt_h / self.capacity_wh).clamp(0.0, 1.0);

        // Cable drop of ~10 mOhm seen at the measurement point.
        let measured_v = battery_voltage_rest + 0.01 * charge_a - 0.01 * discharge_a;

        let f = &mut self.frame;
        f[reg::OP_MODE] = 3;
        f[reg::AC_INPUT_VOLTAGE] = 0;
        f[reg::AC_INPUT_FREQ] = 0;
        f[reg::PV_VOLTAGE] = (pv_voltage * 10.0) as u16;
        f[reg::PV_POWER] = pv_power as u16;
        f[reg::BATTERY_VOLTAGE] = (measured_v * 10.0).round() as u16;
        f[reg::CHARGE_CURRENT] = charge_a as u16;
        f[reg::DISCHARGE_CURRENT] = discharge_a as u16;
        f[reg::AC_OUTPUT_VOLTAGE] = 2300;
        f[reg::AC_OUTPUT_FREQ] = 500;
        f[reg::AC_OUTPUT_VA] = (load / 0.95) as u16;
        f[reg::AC_OUTPUT_WATTS] = load as u16;
        f[reg::AC_OUTPUT_LOAD_PERCENT] = (load / 30.0) as u16;
        f[reg::CHARGER_CODE] = if pv_power > 0.0 { 11 } else { 10 };
        f[reg::TEMPERATURE] = 35 + self.rng.gen_range(0..5);
    }
}

#[async_trait]
impl RegisterBus for SimulatedInverterBus {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        // Serial bus latency at 2400 baud
        tokio::time::sleep(Duration::from_millis(20 + 8 * count as u64)).await;

        if self.rng.gen_bool(self.failure_rate) {
            anyhow::bail!("simulated CRC mismatch at register {}", address);
        }

        let offset = address
            .checked_sub(self.base_address)
            .ok_or_else(|| anyhow::anyhow!("illegal data address {}", address))? as usize;
        if offset + count as usize > self.frame.len() {
            anyhow::bail!("illegal data address {} (+{})", address, count);
        }
        if offset == 0 {
            self.refresh_frame();
        }

        Ok(self.frame[offset..offset + count as usize].to_vec())
    }
}
