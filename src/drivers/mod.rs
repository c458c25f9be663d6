//! Actuator drivers and one-shot peripheral setup.

pub mod hw_init;
pub mod valve;
pub mod watchdog;
