pub mod decoder;
#[cfg(feature = "sim")]
pub mod simulated;
pub mod transport;

pub use decoder::{DecodedRegisters, RegisterDecoder};
#[cfg(feature = "sim")]
pub use simulated::SimulatedInverterBus;
pub use transport::{RegisterBus, RegisterTransport, TransportError, TransportSettings};
