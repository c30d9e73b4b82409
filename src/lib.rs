pub mod config;
pub mod controller;
pub mod domain;
pub mod energy;
pub mod hardware;
pub mod modbus;
pub mod storage;
pub mod telemetry;
pub mod utils;
