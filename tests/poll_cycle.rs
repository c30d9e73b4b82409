use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use inverter_energy_monitor::config::Config;
use inverter_energy_monitor::controller::{GateDecision, InverterMonitor, PollError};
use inverter_energy_monitor::hardware::RegisterBus;
use inverter_energy_monitor::storage::{EnergyRecord, EnergyStore, MemoryEnergyStore};
use inverter_energy_monitor::utils::{ManualClock, Millis};

const BASE: u16 = 4501;
const HOUR: Millis = 3_600_000;

/// Operating point rendered into a register block.
#[derive(Debug, Clone, Copy)]
struct Frame {
    ac_input_v: f64,
    pv_v: f64,
    pv_w: u16,
    battery_v: f64,
    charge_a: u16,
    discharge_a: u16,
    output_va: u16,
    output_w: u16,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            ac_input_v: 230.0,
            pv_v: 0.0,
            pv_w: 0,
            battery_v: 25.9,
            charge_a: 0,
            discharge_a: 0,
            output_va: 500,
            output_w: 400,
        }
    }
}

impl Frame {
    fn words(&self) -> Vec<u16> {
        let deci = |v: f64| (v * 10.0).round() as u16;
        let mut words = vec![0u16; 61];
        words[0] = 4;
        words[1] = deci(self.ac_input_v);
        words[2] = 500;
        words[3] = deci(self.pv_v);
        words[4] = self.pv_w;
        words[5] = deci(self.battery_v);
        words[7] = self.charge_a;
        words[8] = self.discharge_a;
        words[9] = 2300;
        words[10] = 500;
        words[11] = self.output_va;
        words[12] = self.output_w;
        words[13] = 10;
        words[56] = 35;
        words
    }
}

#[derive(Default)]
struct ScriptState {
    words: Vec<u16>,
    failing: bool,
    latency_ms: Millis,
    requests: usize,
}

/// Register bus whose block, failure mode and latency the test changes
/// between cycles.
#[derive(Clone)]
struct ScriptedBus {
    state: Arc<Mutex<ScriptState>>,
    clock: ManualClock,
}

impl ScriptedBus {
    fn new(frame: Frame, clock: ManualClock) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                words: frame.words(),
                ..Default::default()
            })),
            clock,
        }
    }

    fn set_frame(&self, frame: Frame) {
        self.state.lock().unwrap().words = frame.words();
    }

    fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    fn set_latency(&self, latency_ms: Millis) {
        self.state.lock().unwrap().latency_ms = latency_ms;
    }

    fn requests(&self) -> usize {
        self.state.lock().unwrap().requests
    }
}

#[async_trait]
impl RegisterBus for ScriptedBus {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> anyhow::Result<Vec<u16>> {
        let mut state = self.state.lock().unwrap();
        state.requests += 1;
        self.clock.advance(state.latency_ms);
        if state.failing {
            anyhow::bail!("no response from unit 5");
        }
        let start = (address - BASE) as usize;
        Ok(state.words[start..start + count as usize].to_vec())
    }
}

fn config() -> Config {
    let mut cfg = Config::default();
    cfg.bus.chunk_delay_us = 0;
    cfg
}

fn setup(
    frame: Frame,
    store: MemoryEnergyStore,
) -> (InverterMonitor<ScriptedBus, MemoryEnergyStore, ManualClock>, ScriptedBus, ManualClock) {
    let clock = ManualClock::starting_at(10_000);
    let bus = ScriptedBus::new(frame, clock.clone());
    let monitor = InverterMonitor::new(&config(), bus.clone(), store, clock.clone());
    (monitor, bus, clock)
}

fn stored(pv: f64, battery: f64, gauge: f64, ac: f64) -> MemoryEnergyStore {
    MemoryEnergyStore::with_record(&EnergyRecord {
        pv_energy_wh: pv,
        battery_energy_wh: battery,
        gas_gauge_percent: gauge,
        ac_energy_wh: ac,
    })
}

#[tokio::test]
async fn test_cold_start_seeds_gauge_from_voltage() {
    let (mut monitor, bus, _clock) = setup(Frame::default(), MemoryEnergyStore::new());
    monitor.poll_once().await.unwrap();

    let snap = monitor.snapshot();
    assert!(snap.inverter.valid);
    assert!((snap.inverter.gas_gauge_percent - 50.0).abs() < 1e-9);
    assert!((snap.inverter.battery_energy_wh - 1_280.0).abs() < 1e-6);
    assert!((snap.inverter.instantaneous_soc_percent - 50.0).abs() < 1e-9);
    assert_eq!(snap.dc.pv_energy_produced_wh, 0.0);
    assert_eq!(snap.inverter.energy_spent_ac_wh, 0.0);
    assert_eq!(snap.inverter.energy_source_ac_percent, 100.0);
    assert!((snap.ac.power_factor - 0.8).abs() < 1e-12);
    // 61 registers in chunks of 3
    assert_eq!(bus.requests(), 21);
    // the first gate evaluation only captures the baseline
    assert_eq!(monitor.store().save_count(), 0);
}

#[tokio::test]
async fn test_cold_start_outside_voltage_range_is_empty() {
    let frame = Frame {
        battery_v: 21.0,
        ..Default::default()
    };
    let (mut monitor, _bus, _clock) = setup(frame, MemoryEnergyStore::new());
    monitor.poll_once().await.unwrap();

    let inv = monitor.model().inverter;
    assert_eq!(inv.gas_gauge_percent, 0.0);
    assert_eq!(inv.battery_energy_wh, 0.0);
}

#[tokio::test]
async fn test_warm_start_restores_counters() {
    let (mut monitor, _bus, _clock) = setup(Frame::default(), stored(812.0, 1_280.0, 50.0, 15_000.0));
    monitor.poll_once().await.unwrap();

    let snap = monitor.snapshot();
    assert_eq!(snap.dc.pv_energy_produced_wh, 812.0);
    assert_eq!(snap.inverter.battery_energy_wh, 1_280.0);
    assert_eq!(snap.inverter.gas_gauge_percent, 50.0);
    assert_eq!(snap.inverter.energy_spent_ac_wh, 15_000.0);
}

#[tokio::test]
async fn test_energy_accumulates_and_persists() {
    let frame = Frame {
        battery_v: 26.0,
        discharge_a: 10,
        ..Default::default()
    };
    let (mut monitor, _bus, clock) = setup(frame, stored(0.0, 2_000.0, 78.125, 0.0));
    monitor.poll_once().await.unwrap();

    clock.advance(HOUR);
    monitor.poll_once().await.unwrap();

    let inv = monitor.model().inverter;
    // 26.0 V + 0.01 * 10 A drop -> 26.1 V at -10 A for an hour
    assert!((inv.battery_energy_wh - (2_000.0 - 261.0)).abs() < 1e-6);
    assert!((inv.energy_spent_ac_wh - 400.0).abs() < 1e-6);
    assert!((monitor.model().dc.battery_voltage_corrected - 26.1).abs() < 1e-9);

    let store = monitor.store();
    assert_eq!(store.save_count(), 1);
    let saved = EnergyRecord::load_from(store).unwrap().unwrap();
    assert!((saved.ac_energy_wh - 400.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_battery_discharge_reports_autonomy() {
    let frame = Frame {
        ac_input_v: 0.0,
        battery_v: 25.0,
        discharge_a: 20,
        output_w: 400,
        ..Default::default()
    };
    let (mut monitor, _bus, _clock) = setup(frame, stored(0.0, 1_000.0, 39.0625, 0.0));
    monitor.poll_once().await.unwrap();

    let inv = monitor.model().inverter;
    assert_eq!(inv.energy_source_batt_percent, 100.0);
    assert!(inv.efficiency_percent > 0.0 && inv.efficiency_percent <= 100.0);
    assert!(inv.autonomy_minutes > 0);
    assert!(inv.autonomy_minutes < 2 * 24 * 60);
}

#[tokio::test]
async fn test_efficiency_held_without_input_then_clamped() {
    // 25.0 V * 20 A = 500 W in, 400 W out
    let discharging = Frame {
        ac_input_v: 0.0,
        battery_v: 25.0,
        discharge_a: 20,
        output_w: 400,
        ..Frame::default()
    };
    let (mut monitor, bus, _clock) = setup(discharging, MemoryEnergyStore::new());
    monitor.poll_once().await.unwrap();
    assert_eq!(monitor.model().inverter.efficiency_percent, 80.0);

    // no DC input at all keeps the last ratio
    bus.set_frame(Frame {
        discharge_a: 0,
        ..discharging
    });
    monitor.poll_once().await.unwrap();
    assert_eq!(monitor.model().inverter.efficiency_percent, 80.0);

    // 100 W of PV cannot deliver 400 W on its own
    bus.set_frame(Frame {
        pv_v: 120.0,
        pv_w: 100,
        discharge_a: 0,
        ..discharging
    });
    monitor.poll_once().await.unwrap();
    assert_eq!(monitor.model().inverter.efficiency_percent, 100.0);
}

#[tokio::test]
async fn test_failures_reset_poll_interval() {
    let (mut monitor, bus, _clock) = setup(Frame::default(), MemoryEnergyStore::new());

    // 21 requests * 400 ms = 8.4 s per block
    bus.set_latency(400);
    monitor.poll_once().await.unwrap();
    assert!((monitor.model().inverter.read_time_seconds - 8.4).abs() < 1e-9);
    assert_eq!(monitor.snapshot().poll_interval_secs, 10.0);

    bus.set_failing(true);
    assert!(matches!(monitor.poll_once().await, Err(PollError::Transport(_))));
    assert!(!monitor.model().inverter.valid);
    assert_eq!(monitor.consecutive_failures(), 1);
    monitor.poll_once().await.unwrap_err();
    assert_eq!(monitor.snapshot().consecutive_failures, 2);
    assert_eq!(monitor.snapshot().poll_interval_secs, 10.0);

    monitor.poll_once().await.unwrap_err();
    assert_eq!(monitor.consecutive_failures(), 0);
    assert_eq!(monitor.snapshot().poll_interval_secs, 5.0);
}

#[tokio::test]
async fn test_compensation_skips_step_after_failed_cycle() {
    let (mut monitor, bus, _clock) = setup(Frame::default(), MemoryEnergyStore::new());
    monitor.poll_once().await.unwrap();

    bus.set_failing(true);
    monitor.poll_once().await.unwrap_err();

    // a 30 A step right after an invalid cycle must not teach k anything
    bus.set_failing(false);
    bus.set_frame(Frame {
        battery_v: 25.3,
        discharge_a: 30,
        ..Default::default()
    });
    monitor.poll_once().await.unwrap();
    assert_eq!(monitor.model().dc.compensation_k, 0.01);

    // the step back is measured against a valid previous cycle
    bus.set_frame(Frame::default());
    monitor.poll_once().await.unwrap();
    assert!(monitor.model().dc.compensation_k > 0.01);
}

#[tokio::test]
async fn test_pv_counter_resets_after_long_night() {
    let night = Frame::default();
    let day = Frame {
        pv_v: 120.0,
        pv_w: 600,
        ..Default::default()
    };
    let (mut monitor, bus, clock) = setup(night, stored(3_400.0, 1_280.0, 50.0, 0.0));

    monitor.poll_once().await.unwrap();
    clock.advance(7 * HOUR);
    monitor.poll_once().await.unwrap();
    assert_eq!(monitor.model().dc.pv_energy_produced_wh, 3_400.0);

    bus.set_frame(day);
    clock.advance(5_000);
    monitor.poll_once().await.unwrap();
    // only the 5 s since the last dark sample are counted
    let pv = monitor.model().dc.pv_energy_produced_wh;
    assert!(pv > 0.0 && pv < 1.0);
}

#[tokio::test]
async fn test_force_save_bypasses_thresholds() {
    let (mut monitor, _bus, _clock) = setup(Frame::default(), MemoryEnergyStore::new());
    monitor.poll_once().await.unwrap();
    assert_eq!(monitor.store().save_count(), 0);

    assert_eq!(monitor.force_save().unwrap(), GateDecision::Saved);
    let store = monitor.store();
    assert_eq!(store.save_count(), 1);
    assert!(store.load("pv_energy").unwrap().is_some());
}

#[tokio::test]
async fn test_run_flushes_on_shutdown() {
    let (mut monitor, bus, _clock) = setup(Frame::default(), MemoryEnergyStore::new());
    monitor.run(async {}).await.unwrap();

    assert_eq!(bus.requests(), 21);
    assert_eq!(monitor.store().save_count(), 1);
}

#[tokio::test]
async fn test_snapshot_subscribers_see_each_cycle() {
    let (mut monitor, bus, _clock) = setup(Frame::default(), MemoryEnergyStore::new());
    let mut rx = monitor.subscribe();
    assert!(!rx.borrow().inverter.valid);

    monitor.poll_once().await.unwrap();
    assert!(rx.has_changed().unwrap());
    assert!(rx.borrow_and_update().inverter.valid);

    bus.set_failing(true);
    monitor.poll_once().await.unwrap_err();
    assert!(rx.has_changed().unwrap());
    let snap = rx.borrow_and_update().clone();
    assert!(!snap.inverter.valid);
    assert_eq!(snap.consecutive_failures, 1);
}
