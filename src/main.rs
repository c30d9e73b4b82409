use anyhow::Result;
use config::{BusKind, Config};
use inverter_energy_monitor::hardware::RegisterBus;
use inverter_energy_monitor::storage::FileEnergyStore;
use inverter_energy_monitor::utils::SystemClock;
use inverter_energy_monitor::{config, controller, telemetry};
use tracing::{info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cfg = Config::load()?;
    telemetry::init_tracing(cfg.telemetry.log_format);

    let bus = build_bus(&cfg).await?;
    let store = FileEnergyStore::open(&cfg.persistence.path)?;

    info!(
        kind = ?cfg.bus.kind,
        base_address = cfg.bus.base_address,
        registers = cfg.bus.register_count,
        store = %cfg.persistence.path.display(),
        "starting inverter energy monitor"
    );

    let mut monitor = controller::InverterMonitor::new(&cfg, bus, store, SystemClock::new());
    monitor.run(telemetry::shutdown_signal()).await?;

    warn!("shutdown complete");
    Ok(())
}

async fn build_bus(cfg: &Config) -> Result<Box<dyn RegisterBus>> {
    match cfg.bus.kind {
        #[cfg(feature = "sim")]
        BusKind::Sim => {
            warn!("using simulated inverter bus");
            Ok(Box::new(
                inverter_energy_monitor::hardware::SimulatedInverterBus::new(cfg.bus.base_address),
            ))
        }
        #[cfg(feature = "modbus")]
        BusKind::Tcp => {
            let client = inverter_energy_monitor::modbus::client::ModbusClient::connect_with_timeout(
                &cfg.bus.tcp_addr,
                cfg.bus.unit_id,
                std::time::Duration::from_millis(cfg.bus.timeout_ms),
            )
            .await?;
            Ok(Box::new(client))
        }
        #[cfg(feature = "modbus-rtu")]
        BusKind::Rtu => {
            let client = inverter_energy_monitor::modbus::client::ModbusClient::open_rtu(
                &cfg.bus.serial_path,
                cfg.bus.baud_rate,
                cfg.bus.unit_id,
                std::time::Duration::from_millis(cfg.bus.timeout_ms),
            )
            .await?;
            Ok(Box::new(client))
        }
        #[allow(unreachable_patterns)]
        kind => anyhow::bail!("bus kind {:?} requires a feature this binary was built without", kind),
    }
}
