//! GPIO / peripheral pin assignments for the irrigation controller board.
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers.

use crate::model::MAX_CHANNELS;

// ---------------------------------------------------------------------------
// Valves (relay / MOSFET drivers)
// ---------------------------------------------------------------------------

/// Zone valve outputs, channel 0 first.
pub const ZONE_VALVE_GPIOS: [i32; MAX_CHANNELS] = [1, 2, 3, 4, 5, 6, 7, 8];

/// Master (supply) valve output.  The relay board is active-low.
pub const MASTER_VALVE_GPIO: i32 = 21;

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

/// YF-S201 hall-effect flow sensor, pulse output, interrupt-driven.
pub const FLOW_PULSE_GPIO: i32 = 10;

/// NTC thermistor (10 kΩ @ 25 °C) in a divider to ADC1 channel 8 (GPIO 9).
pub const TEMP_ADC_GPIO: i32 = 9;
pub const TEMP_ADC1_CHANNEL: u32 = 8;

