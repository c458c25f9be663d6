//! Sensor drivers: the flow pulse counter and the ambient thermistor.

pub mod flow;
pub mod temperature;
