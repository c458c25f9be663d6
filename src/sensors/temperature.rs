//! NTC thermistor ambient temperature sensor (10 kΩ @ 25 °C, B = 3950).
//!
//! Wired in a voltage divider with a fixed 10 kΩ resistor and read through
//! ADC1.  The Beta equation converts resistance to temperature.  An open
//! or shorted thermistor reads at a rail and yields `None`, which the
//! freeze gate treats as missing data.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: reads the oneshot ADC channel set up by `hw_init`.
//! On host/test: reads a static injected raw value.

#[cfg(not(target_os = "espidf"))]
use core::sync::atomic::{AtomicU16, Ordering};

#[cfg(target_os = "espidf")]
use crate::drivers::hw_init;

#[cfg(not(target_os = "espidf"))]
static SIM_TEMP_ADC: AtomicU16 = AtomicU16::new(2048);

#[cfg(not(target_os = "espidf"))]
pub fn sim_set_temp_adc(raw: u16) {
    SIM_TEMP_ADC.store(raw, Ordering::Relaxed);
}

const R25: f32 = 10_000.0;
const BETA: f32 = 3950.0;
const T25_K: f32 = 298.15;
const R_DIVIDER: f32 = 10_000.0;
const ADC_MAX: f32 = 4095.0;
const V_REF: f32 = 3.3;
/// Readings this close to a rail mean a broken divider.
const RAIL_MARGIN_V: f32 = 0.01;

pub struct TemperatureSensor {
    adc_channel: u32,
}

impl TemperatureSensor {
    pub const fn new(adc_channel: u32) -> Self {
        Self { adc_channel }
    }

    /// Degrees Celsius, or `None` when the sensor cannot be trusted.
    pub fn read_celsius(&self) -> Option<f32> {
        adc_to_celsius(self.read_adc()?)
    }

    #[cfg(target_os = "espidf")]
    fn read_adc(&self) -> Option<u16> {
        hw_init::adc1_read(self.adc_channel)
    }

    #[cfg(not(target_os = "espidf"))]
    fn read_adc(&self) -> Option<u16> {
        let _ = self.adc_channel;
        Some(SIM_TEMP_ADC.load(Ordering::Relaxed))
    }
}

pub fn adc_to_celsius(raw: u16) -> Option<f32> {
    let voltage = (f32::from(raw) / ADC_MAX) * V_REF;
    if voltage <= RAIL_MARGIN_V || voltage >= V_REF - RAIL_MARGIN_V {
        return None;
    }
    let r_ntc = R_DIVIDER * voltage / (V_REF - voltage);
    let inv_t = (1.0 / T25_K) + (1.0 / BETA) * (r_ntc / R25).ln();
    if inv_t <= 0.0 {
        return None;
    }
    Some((1.0 / inv_t) - 273.15)
}
