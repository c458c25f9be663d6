//! Hardware adapter — bridges the board to the domain port traits.
//!
//! [`BoardPlatform`] owns the valve bank, the clock, the thermistor, NVS,
//! the event sink and the external collaborators, and implements every
//! port so it satisfies [`Platform`].  The flow port reads the board-wide
//! ISR counter.

use log::warn;

use crate::adapters::log_sink::LogEventSink;
use crate::adapters::nvs::NvsAdapter;
use crate::adapters::time::EspClock;
use crate::app::events::WateringEvent;
use crate::app::ports::{
    ClockPort, DemandDecision, DemandPort, EnvironmentPort, EventSink, FlowSensorPort, RainImpact,
    RainPort, StorageError, StoragePort, TemperatureSample, ValveId, ValvePort,
};
use crate::error::{ActuatorError, Result};
use crate::model::LocalTime;
use crate::sensors::flow::PULSE_COUNTER;
use crate::sensors::temperature::TemperatureSensor;

/// Concrete platform combining all board hardware behind the ports.
pub struct BoardPlatform<V, D, R> {
    valves: V,
    clock: EspClock,
    thermistor: TemperatureSensor,
    sample: Option<TemperatureSample>,
    storage: NvsAdapter,
    sink: LogEventSink,
    demand: D,
    rain: R,
}

impl<V: ValvePort, D: DemandPort, R: RainPort> BoardPlatform<V, D, R> {
    pub fn new(
        valves: V,
        clock: EspClock,
        thermistor: TemperatureSensor,
        storage: NvsAdapter,
        demand: D,
        rain: R,
    ) -> Self {
        Self {
            valves,
            clock,
            thermistor,
            sample: None,
            storage,
            sink: LogEventSink::new(),
            demand,
            rain,
        }
    }
}

// ── ValvePort ─────────────────────────────────────────────────

impl<V: ValvePort, D, R> ValvePort for BoardPlatform<V, D, R> {
    fn write(&mut self, valve: ValveId, level: bool) -> core::result::Result<(), ActuatorError> {
        self.valves.write(valve, level)
    }
}

// ── FlowSensorPort ────────────────────────────────────────────

impl<V, D, R> FlowSensorPort for BoardPlatform<V, D, R> {
    fn pulse_count(&self) -> u32 {
        PULSE_COUNTER.count()
    }

    fn reset_pulses(&mut self) {
        PULSE_COUNTER.reset();
    }
}

// ── ClockPort ─────────────────────────────────────────────────

impl<V, D, R> ClockPort for BoardPlatform<V, D, R> {
    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    fn delay_ms(&mut self, ms: u32) {
        self.clock.delay_ms(ms);
    }

    fn read_rtc(&mut self) -> Result<LocalTime> {
        self.clock.read_rtc()
    }
}

// ── EnvironmentPort ───────────────────────────────────────────

impl<V, D, R> EnvironmentPort for BoardPlatform<V, D, R> {
    fn latest_temperature(&self) -> Option<TemperatureSample> {
        self.sample
    }

    fn refresh_temperature(&mut self) {
        match self.thermistor.read_celsius() {
            Some(celsius) => {
                self.sample = Some(TemperatureSample {
                    celsius,
                    taken_at_ms: self.clock.now_ms(),
                });
            }
            None => warn!("thermistor reading out of range"),
        }
    }
}

// ── Collaborators ─────────────────────────────────────────────

impl<V, D: DemandPort, R> DemandPort for BoardPlatform<V, D, R> {
    fn decide(&mut self, channel: u8) -> Result<DemandDecision> {
        self.demand.decide(channel)
    }

    fn apply_missed_days(&mut self, channel: u8, days: u32) -> Result<()> {
        self.demand.apply_missed_days(channel, days)
    }
}

impl<V, D, R: RainPort> RainPort for BoardPlatform<V, D, R> {
    fn impact(&mut self, channel: u8) -> RainImpact {
        self.rain.impact(channel)
    }
}

// ── Storage / events ──────────────────────────────────────────

impl<V, D, R> StoragePort for BoardPlatform<V, D, R> {
    fn read(
        &self,
        namespace: &str,
        key: &str,
        buf: &mut [u8],
    ) -> core::result::Result<usize, StorageError> {
        self.storage.read(namespace, key, buf)
    }

    fn write(
        &mut self,
        namespace: &str,
        key: &str,
        data: &[u8],
    ) -> core::result::Result<(), StorageError> {
        self.storage.write(namespace, key, data)
    }

    fn delete(&mut self, namespace: &str, key: &str) -> core::result::Result<(), StorageError> {
        self.storage.delete(namespace, key)
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.storage.exists(namespace, key)
    }
}

impl<V, D, R> EventSink for BoardPlatform<V, D, R> {
    fn emit(&mut self, event: &WateringEvent) {
        self.sink.emit(event);
    }
}
