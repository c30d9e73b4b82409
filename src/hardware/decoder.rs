use crate::config::{BusConfig, PvConfig};
use crate::domain::{AcSample, DataModel, OperatingMode};
use crate::modbus::parser::{parse_scaled_u16, word_at, WordOrder};
use crate::modbus::register_map as reg;

/// Engineering-unit fields of one register block, before any estimation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DecodedRegisters {
    pub operating_mode_code: u16,
    pub charger_code: u16,
    pub temperature: f64,
    pub ac: AcSample,
    pub pv_voltage: f64,
    pub pv_power: f64,
    pub pv_current: f64,
    pub battery_voltage: f64,
    pub charge_current: f64,
    pub discharge_current: f64,
    pub charge_power: f64,
    pub discharge_power: f64,
}

impl DecodedRegisters {
    /// Copies the measured fields into the model; accumulators, estimator
    /// state and `*_prev` history are left alone.
    pub fn apply_to(&self, model: &mut DataModel) {
        model.ac = self.ac;

        let dc = &mut model.dc;
        dc.pv_voltage = self.pv_voltage;
        dc.pv_power = self.pv_power;
        dc.pv_current = self.pv_current;
        dc.battery_voltage = self.battery_voltage;
        dc.charge_current = self.charge_current;
        dc.discharge_current = self.discharge_current;
        dc.charge_power = self.charge_power;
        dc.discharge_power = self.discharge_power;

        let inv = &mut model.inverter;
        inv.operating_mode_code = self.operating_mode_code;
        inv.operating_mode = OperatingMode::from(self.operating_mode_code);
        inv.charger_code = self.charger_code;
        inv.temperature = self.temperature;
    }
}

/// Maps the raw status block to engineering units.
#[derive(Debug, Clone, Copy)]
pub struct RegisterDecoder {
    noise_floor_raw: u16,
    order: WordOrder,
}

impl Default for RegisterDecoder {
    fn default() -> Self {
        Self {
            noise_floor_raw: 60,
            order: WordOrder::BigEndian,
        }
    }
}

impl RegisterDecoder {
    pub fn new(noise_floor_raw: u16, order: WordOrder) -> Self {
        Self {
            noise_floor_raw,
            order,
        }
    }

    pub fn from_config(bus: &BusConfig, pv: &PvConfig) -> Self {
        let order = if bus.swap_bytes {
            WordOrder::Swapped
        } else {
            WordOrder::BigEndian
        };
        Self::new(pv.noise_floor_raw, order)
    }

    fn raw(&self, words: &[u16], offset: usize) -> u16 {
        word_at(words, offset, self.order)
    }

    fn deci(&self, words: &[u16], offset: usize) -> f64 {
        parse_scaled_u16(self.raw(words, offset), reg::DECI_DIVISOR)
    }

    fn unit(&self, words: &[u16], offset: usize) -> f64 {
        parse_scaled_u16(self.raw(words, offset), reg::UNIT_DIVISOR)
    }

    pub fn decode(&self, words: &[u16]) -> DecodedRegisters {
        let mut ac = AcSample {
            input_voltage: self.deci(words, reg::AC_INPUT_VOLTAGE),
            input_freq: self.deci(words, reg::AC_INPUT_FREQ),
            output_voltage: self.deci(words, reg::AC_OUTPUT_VOLTAGE),
            output_freq: self.deci(words, reg::AC_OUTPUT_FREQ),
            output_va: self.unit(words, reg::AC_OUTPUT_VA),
            output_watts: self.unit(words, reg::AC_OUTPUT_WATTS),
            output_load_percent: self.unit(words, reg::AC_OUTPUT_LOAD_PERCENT),
            power_factor: 1.0,
        };
        if ac.output_watts > 0.0 && ac.output_va > 0.0 {
            ac.power_factor = ac.output_watts / ac.output_va;
        }

        // Marginal PV readings are sensor artifacts, not production.
        let (pv_voltage, pv_power) = if self.raw(words, reg::PV_VOLTAGE) < self.noise_floor_raw {
            (0.0, 0.0)
        } else {
            (self.deci(words, reg::PV_VOLTAGE), self.unit(words, reg::PV_POWER))
        };
        let pv_current = if pv_voltage > 0.0 { pv_power / pv_voltage } else { 0.0 };

        let battery_voltage = self.deci(words, reg::BATTERY_VOLTAGE);
        let charge_current = self.unit(words, reg::CHARGE_CURRENT);
        let discharge_current = self.unit(words, reg::DISCHARGE_CURRENT);

        DecodedRegisters {
            operating_mode_code: self.raw(words, reg::OP_MODE),
            charger_code: self.raw(words, reg::CHARGER_CODE),
            temperature: self.unit(words, reg::TEMPERATURE),
            ac,
            pv_voltage,
            pv_power,
            pv_current,
            battery_voltage,
            charge_current,
            discharge_current,
            charge_power: battery_voltage * charge_current,
            discharge_power: battery_voltage * discharge_current,
        }
    }
}
