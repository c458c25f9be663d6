//! Solenoid valve output bank.
//!
//! Owns one output pin per zone plus an optional master valve and
//! implements [`ValvePort`].  Levels arrive already polarity-adjusted from
//! the valve coordinator; this driver only moves pins.
//!
//! ## Dual-target design
//!
//! Generic over `embedded_hal::digital::OutputPin`: on ESP-IDF the pins are
//! `esp_idf_hal::gpio::PinDriver`s, on the host any mock pin works.

use embedded_hal::digital::{OutputPin, PinState};
use heapless::Vec;
use log::{debug, error};

use crate::app::ports::{ValveId, ValvePort};
use crate::error::ActuatorError;
use crate::model::MAX_CHANNELS;

pub struct ValveBank<Z: OutputPin, M: OutputPin> {
    zones: Vec<Z, MAX_CHANNELS>,
    master: Option<M>,
}

impl<Z: OutputPin, M: OutputPin> ValveBank<Z, M> {
    /// Zones are numbered in the order given.  Extra pins beyond
    /// [`MAX_CHANNELS`] are dropped.
    pub fn new(zones: impl IntoIterator<Item = Z>, master: Option<M>) -> Self {
        Self {
            zones: zones.into_iter().take(MAX_CHANNELS).collect(),
            master,
        }
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    pub fn has_master(&self) -> bool {
        self.master.is_some()
    }
}

impl<Z: OutputPin, M: OutputPin> ValvePort for ValveBank<Z, M> {
    fn write(&mut self, valve: ValveId, level: bool) -> Result<(), ActuatorError> {
        let state = PinState::from(level);
        let result = match valve {
            ValveId::Zone(id) => self
                .zones
                .get_mut(usize::from(id))
                .ok_or(ActuatorError::NoSuchOutput)?
                .set_state(state)
                .map_err(|_| ActuatorError::GpioWriteFailed),
            ValveId::Master => self
                .master
                .as_mut()
                .ok_or(ActuatorError::NoSuchOutput)?
                .set_state(state)
                .map_err(|_| ActuatorError::GpioWriteFailed),
        };
        match result {
            Ok(()) => debug!("valve {:?} <- {}", valve, u8::from(level)),
            Err(e) => error!("valve {:?} write failed: {e}", valve),
        }
        result
    }
}
