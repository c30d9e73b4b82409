pub mod apportion;
pub mod autonomy;
pub mod compensation;
pub mod gas_gauge;
pub mod integrator;
pub mod pv;

pub use apportion::{apportion, EnergySources, SourceInput};
pub use autonomy::{AutonomyEstimator, AutonomyInput};
pub use compensation::VoltageCompensator;
pub use gas_gauge::{voltage_soc, BatteryGasGauge, Boundary, GaugeReading};
pub use integrator::EnergyIntegrator;
pub use pv::{DayPhase, PvProductionTracker};
