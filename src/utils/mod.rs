pub mod clock;
pub mod ewma;

pub use clock::{elapsed_ms, ms_to_hours, Clock, ManualClock, Millis, SystemClock};
pub use ewma::{dynamic_alpha, Ewma};
