pub mod persistence;
pub mod scheduler;

use std::future::Future;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{BatteryConfig, Config};
use crate::domain::{DataModel, Snapshot};
use crate::energy::{
    apportion, voltage_soc, AutonomyEstimator, AutonomyInput, BatteryGasGauge, EnergyIntegrator,
    PvProductionTracker, SourceInput, VoltageCompensator,
};
use crate::hardware::{RegisterBus, RegisterDecoder, RegisterTransport, TransportError, TransportSettings};
use crate::storage::{EnergyRecord, EnergyStore, StoreError};
use crate::utils::{elapsed_ms, Clock};

pub use persistence::{GateDecision, PersistenceGate};
pub use scheduler::AdaptivePollScheduler;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("register read failed: {0}")]
    Transport(#[from] TransportError),
}

/// Owns every estimator and the data model, and runs one poll cycle at a time.
///
/// The model has a single writer (this struct); readers get immutable
/// [`Snapshot`]s through a watch channel published at the end of each cycle.
pub struct InverterMonitor<B, S, C> {
    transport: RegisterTransport<B>,
    decoder: RegisterDecoder,
    compensator: VoltageCompensator,
    gas_gauge: BatteryGasGauge,
    pv: PvProductionTracker,
    ac_energy: EnergyIntegrator,
    autonomy: AutonomyEstimator,
    scheduler: AdaptivePollScheduler,
    gate: PersistenceGate,
    store: S,
    clock: C,
    battery: BatteryConfig,
    base_address: u16,
    register_count: u16,
    model: DataModel,
    seeded: bool,
    // Uptime outlives the wrapping millisecond clock.
    started: Instant,
    snapshot_tx: watch::Sender<Snapshot>,
}

impl<B, S, C> InverterMonitor<B, S, C>
where
    B: RegisterBus,
    S: EnergyStore,
    C: Clock,
{
    pub fn new(cfg: &Config, bus: B, store: S, clock: C) -> Self {
        let autonomy = AutonomyEstimator::from_config(&cfg.autonomy);
        let scheduler = AdaptivePollScheduler::new(&cfg.poll);
        let model = DataModel::new(cfg.battery.initial_compensation_k, autonomy.max_minutes());
        let started = Instant::now();
        let (snapshot_tx, _) = watch::channel(build_snapshot(&model, &scheduler, 0));

        Self {
            transport: RegisterTransport::new(bus, TransportSettings::from(&cfg.bus)),
            decoder: RegisterDecoder::from_config(&cfg.bus, &cfg.pv),
            compensator: VoltageCompensator::new(cfg.battery.initial_compensation_k),
            gas_gauge: BatteryGasGauge::from_config(&cfg.battery),
            pv: PvProductionTracker::from_config(&cfg.pv),
            ac_energy: EnergyIntegrator::new(),
            autonomy,
            scheduler,
            gate: PersistenceGate::new(cfg.persistence.thresholds),
            store,
            clock,
            battery: cfg.battery.clone(),
            base_address: cfg.bus.base_address,
            register_count: cfg.bus.register_count,
            model,
            seeded: false,
            started,
            snapshot_tx,
        }
    }

    pub fn model(&self) -> &DataModel {
        &self.model
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        self.scheduler.interval()
    }

    pub fn consecutive_failures(&self) -> u8 {
        self.scheduler.consecutive_failures()
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// One complete read, decode, derive and persist pass.
    pub async fn poll_once(&mut self) -> Result<(), PollError> {
        let read_started = self.clock.now_ms();
        let words = match self
            .transport
            .read_block(self.base_address, self.register_count)
            .await
        {
            Ok(words) => words,
            Err(e) => {
                self.model.inverter.valid = false;
                let failures = self.scheduler.record_failure();
                warn!(error = %e, consecutive_failures = failures, "poll cycle failed");
                self.publish();
                return Err(e.into());
            }
        };
        let now = self.clock.now_ms();
        let read_time_secs = elapsed_ms(read_started, now) as f64 / 1000.0;

        self.decoder.decode(&words).apply_to(&mut self.model);

        let previous_valid = self.model.inverter.valid;
        let corrected = self.compensator.update(&self.model.dc, previous_valid);
        self.model.dc.battery_voltage_corrected = corrected;
        self.model.dc.compensation_k = self.compensator.k();

        self.update_efficiency();
        self.model.inverter.instantaneous_soc_percent =
            voltage_soc(corrected, self.battery.soc_min_voltage, self.battery.soc_max_voltage);

        if !self.seeded {
            self.seed(corrected);
        }

        let dc = self.model.dc;
        let gauge = self.gas_gauge.update(
            self.model.inverter.battery_energy_wh,
            corrected,
            dc.charge_current,
            dc.discharge_current,
            now,
        );
        self.model.inverter.battery_energy_wh = gauge.energy_wh;
        self.model.inverter.gas_gauge_percent = gauge.percent;

        self.model.dc.pv_energy_produced_wh = self.pv.update(
            dc.pv_energy_produced_wh,
            dc.pv_voltage,
            dc.pv_current,
            dc.pv_power,
            now,
        );
        self.model.inverter.energy_spent_ac_wh = self.ac_energy.integrate(
            self.model.inverter.energy_spent_ac_wh,
            self.model.ac.output_watts,
            now,
        );

        let sources = apportion(&SourceInput {
            ac_input_voltage: self.model.ac.input_voltage,
            ac_output_watts: self.model.ac.output_watts,
            pv_power: dc.pv_power,
            charge_power: dc.charge_power,
            discharge_power: dc.discharge_power,
        });
        self.model.inverter.energy_source_ac_percent = sources.ac_percent;
        self.model.inverter.energy_source_batt_percent = sources.batt_percent;
        self.model.inverter.energy_source_pv_percent = sources.pv_percent;

        self.model.inverter.autonomy_minutes = self.autonomy.update(AutonomyInput {
            battery_energy_wh: self.model.inverter.battery_energy_wh,
            ac_output_watts: self.model.ac.output_watts,
            efficiency_percent: self.model.inverter.efficiency_percent,
            poll_interval_secs: self.scheduler.interval_secs(),
        });

        self.scheduler.record_success(read_time_secs);
        self.model.inverter.read_time_seconds = read_time_secs;
        self.model.inverter.read_time_mean_seconds = self.scheduler.read_time_mean_secs();

        self.model.dc.roll_previous();
        self.model.inverter.valid = true;

        // A failed flush keeps the old baseline, so the next cycle retries it.
        let record = self.record();
        if let Err(e) = self.gate.evaluate(&mut self.store, &record, false) {
            debug!(error = %e, "energy counters not persisted this cycle");
        }

        self.publish();
        let inv = &self.model.inverter;
        info!(
            mode = %inv.operating_mode,
            battery_v = self.model.dc.battery_voltage,
            corrected_v = corrected,
            gas_gauge = inv.gas_gauge_percent,
            soc = inv.instantaneous_soc_percent,
            pv_wh = self.model.dc.pv_energy_produced_wh,
            ac_wh = inv.energy_spent_ac_wh,
            autonomy_min = inv.autonomy_minutes,
            interval_secs = self.scheduler.interval_secs(),
            "poll cycle complete"
        );
        Ok(())
    }

    /// Writes the accumulators immediately, bypassing the change thresholds.
    ///
    /// Before the first successful cycle the model holds no real counters,
    /// so nothing is written.
    pub fn force_save(&mut self) -> Result<GateDecision, StoreError> {
        if !self.seeded {
            info!("force save skipped, no successful poll yet");
            return Ok(GateDecision::Unchanged);
        }
        let record = self.record();
        let decision = self.gate.evaluate(&mut self.store, &record, true)?;
        info!("energy counters flushed");
        Ok(decision)
    }

    /// Polls until `shutdown` resolves, sleeping the adaptive interval
    /// between cycles, then flushes the counters.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), StoreError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            if let Err(e) = self.poll_once().await {
                debug!(error = %e, "cycle ended early");
            }

            let interval = self.scheduler.interval();
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.force_save()?;
        Ok(())
    }

    fn update_efficiency(&mut self) {
        let input_power = self.model.dc.pv_power + self.model.dc.discharge_power;
        if input_power > 0.0 {
            self.model.inverter.efficiency_percent =
                (100.0 * self.model.ac.output_watts / input_power).clamp(0.0, 100.0);
        }
    }

    /// Loads the persisted counters, or estimates them from the corrected
    /// voltage when nothing was ever saved.
    fn seed(&mut self, corrected_voltage: f64) {
        let stored = match EnergyRecord::load_from(&self.store) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "failed to load energy counters, cold starting");
                None
            }
        };

        match stored {
            Some(record) => {
                self.model.dc.pv_energy_produced_wh = record.pv_energy_wh;
                self.model.inverter.battery_energy_wh = record.battery_energy_wh;
                self.model.inverter.gas_gauge_percent = record.gas_gauge_percent;
                self.model.inverter.energy_spent_ac_wh = record.ac_energy_wh;
                info!(
                    pv_wh = record.pv_energy_wh,
                    battery_wh = record.battery_energy_wh,
                    gas_gauge = record.gas_gauge_percent,
                    ac_wh = record.ac_energy_wh,
                    "warm start from stored counters"
                );
            }
            None => {
                self.model.dc.pv_energy_produced_wh = 0.0;
                self.model.inverter.energy_spent_ac_wh = 0.0;
                let in_range = corrected_voltage >= self.battery.minimum_voltage
                    && corrected_voltage <= self.battery.maximum_voltage;
                let soc = if in_range {
                    self.model.inverter.instantaneous_soc_percent
                } else {
                    0.0
                };
                self.model.inverter.gas_gauge_percent = soc;
                self.model.inverter.battery_energy_wh =
                    soc * self.gas_gauge.maximum_energy_wh() / 100.0;
                info!(
                    voltage = corrected_voltage,
                    soc,
                    battery_wh = self.model.inverter.battery_energy_wh,
                    "cold start, gas gauge seeded from voltage"
                );
            }
        }
        self.seeded = true;
    }

    fn record(&self) -> EnergyRecord {
        EnergyRecord {
            pv_energy_wh: self.model.dc.pv_energy_produced_wh,
            battery_energy_wh: self.model.inverter.battery_energy_wh,
            gas_gauge_percent: self.model.inverter.gas_gauge_percent,
            ac_energy_wh: self.model.inverter.energy_spent_ac_wh,
        }
    }

    fn publish(&self) {
        let snapshot = build_snapshot(
            &self.model,
            &self.scheduler,
            self.started.elapsed().as_secs(),
        );
        self.snapshot_tx.send_replace(snapshot);
    }
}

fn build_snapshot(model: &DataModel, scheduler: &AdaptivePollScheduler, uptime_secs: u64) -> Snapshot {
    Snapshot {
        ac: model.ac,
        dc: model.dc,
        inverter: model.inverter,
        poll_interval_secs: scheduler.interval_secs(),
        consecutive_failures: scheduler.consecutive_failures(),
        uptime_secs,
        taken_at: chrono::Utc::now(),
    }
}
