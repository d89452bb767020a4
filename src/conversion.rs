//! Raw sample to physical units. Everything here is a pure function of its
//! inputs and the immutable [`Calibration`].

use crate::adc::{RawSample, RAW_MAX};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SECONDS_PER_HOUR: f64 = 3600.0;
const WATTS_PER_KILOWATT: f64 = 1000.0;

/// Front-end calibration constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// ADC reference voltage (V)
    #[serde(default = "default_vref")]
    pub vref: f64,
    /// Sense resistor (Ω)
    #[serde(default = "default_shunt")]
    pub shunt_resistor_ohms: f64,
    /// Current-sense amplifier gain
    #[serde(default = "default_gain")]
    pub gain: f64,
    /// Nominal mains voltage, unity power factor assumed (V)
    #[serde(default = "default_mains")]
    pub mains_voltage: f64,
}

fn default_vref() -> f64 {
    3.3
}

fn default_shunt() -> f64 {
    0.1
}

fn default_gain() -> f64 {
    5.0
}

fn default_mains() -> f64 {
    230.0
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            vref: default_vref(),
            shunt_resistor_ohms: default_shunt(),
            gain: default_gain(),
            mains_voltage: default_mains(),
        }
    }
}

impl Calibration {
    pub fn validate(&self) -> Result<()> {
        let constants = [
            ("vref", self.vref),
            ("shunt_resistor_ohms", self.shunt_resistor_ohms),
            ("gain", self.gain),
            ("mains_voltage", self.mains_voltage),
        ];
        for (name, value) in constants {
            if !value.is_finite() || value <= 0.0 {
                return Err(AppError::Config(format!(
                    "calibration {} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    pub fn to_current_amps(&self, raw: RawSample) -> f64 {
        let voltage = (raw.value() as f64 / RAW_MAX as f64) * self.vref;
        voltage / (self.shunt_resistor_ohms * self.gain)
    }

    pub fn to_power_watts(&self, current_amps: f64) -> f64 {
        self.mains_voltage * current_amps
    }
}

/// Energy drawn at constant `power_watts` over `elapsed`, in kWh.
pub fn energy_delta_kwh(power_watts: f64, elapsed: Duration) -> f64 {
    (power_watts / WATTS_PER_KILOWATT) * (elapsed.as_secs_f64() / SECONDS_PER_HOUR)
}
