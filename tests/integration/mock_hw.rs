//! Mock platform for integration tests.
//!
//! Implements every port on one struct: a simulated monotonic clock that
//! `delay_ms` advances, a settable pulse counter and thermometer, scripted
//! demand and rain answers, an in-memory key-value store, and a record of
//! every valve write and emitted event.

use irrigator::app::events::{CompletionReport, WateringEvent};
use irrigator::app::ports::{
    ClockPort, DemandDecision, DemandPort, EnvironmentPort, EventSink, FlowSensorPort, RainImpact,
    RainPort, StorageError, StoragePort, TemperatureSample, ValveId, ValvePort,
};
use irrigator::app::service::WateringSystem;
use irrigator::config::SystemConfig;
use irrigator::error::{ActuatorError, Result, WateringError};
use irrigator::model::LocalTime;
use std::collections::HashMap;

// ── Valve write record ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValveWrite {
    pub at_ms: u64,
    pub valve: ValveId,
    pub level: bool,
}

// ── MockPlatform ──────────────────────────────────────────────

pub struct MockPlatform {
    pub now_ms: u64,
    pub rtc: Option<LocalTime>,
    pub pulses: u32,
    pub ambient_c: Option<f32>,
    pub sample: Option<TemperatureSample>,
    pub demand: Option<DemandDecision>,
    pub missed_days: Vec<(u8, u32)>,
    pub rain: RainImpact,
    pub store: HashMap<(String, String), Vec<u8>>,
    pub writes: Vec<ValveWrite>,
    pub events: Vec<WateringEvent>,
    pub broken: Option<ValveId>,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(dead_code)]
impl MockPlatform {
    /// Warm (20 °C) with no RTC.
    pub fn new() -> Self {
        Self {
            now_ms: 0,
            rtc: None,
            pulses: 0,
            ambient_c: Some(20.0),
            sample: None,
            demand: None,
            missed_days: Vec::new(),
            rain: RainImpact::default(),
            store: HashMap::new(),
            writes: Vec::new(),
            events: Vec::new(),
            broken: None,
        }
    }

    pub fn advance(&mut self, ms: u64) {
        self.now_ms += ms;
    }

    pub fn add_pulses(&mut self, n: u32) {
        self.pulses += n;
    }

    /// Change the ambient temperature and take a fresh reading now.
    pub fn set_temperature(&mut self, celsius: Option<f32>) {
        self.ambient_c = celsius;
        self.sample = celsius.map(|c| TemperatureSample {
            celsius: c,
            taken_at_ms: self.now_ms,
        });
    }

    fn last_level(&self, valve: ValveId) -> Option<bool> {
        self.writes
            .iter()
            .rev()
            .find(|w| w.valve == valve)
            .map(|w| w.level)
    }

    /// Zones are active-high in the default configuration.
    pub fn zone_open(&self, channel: u8) -> bool {
        self.last_level(ValveId::Zone(channel)).unwrap_or(false)
    }

    /// The master is active-low.
    pub fn master_open(&self) -> bool {
        self.last_level(ValveId::Master).is_some_and(|level| !level)
    }

    pub fn open_zones(&self) -> usize {
        (0..8u8).filter(|&c| self.zone_open(c)).count()
    }

    pub fn clear_history(&mut self) {
        self.writes.clear();
        self.events.clear();
    }

    pub fn count_events(&self, pred: impl Fn(&WateringEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn completions(&self) -> Vec<CompletionReport> {
        self.events
            .iter()
            .filter_map(|e| match e {
                WateringEvent::TaskCompleted(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    pub fn master_writes(&self) -> Vec<ValveWrite> {
        self.writes
            .iter()
            .filter(|w| w.valve == ValveId::Master)
            .copied()
            .collect()
    }
}

impl ValvePort for MockPlatform {
    fn write(&mut self, valve: ValveId, level: bool) -> core::result::Result<(), ActuatorError> {
        if self.broken == Some(valve) {
            return Err(ActuatorError::GpioWriteFailed);
        }
        self.writes.push(ValveWrite {
            at_ms: self.now_ms,
            valve,
            level,
        });
        Ok(())
    }
}

impl FlowSensorPort for MockPlatform {
    fn pulse_count(&self) -> u32 {
        self.pulses
    }

    fn reset_pulses(&mut self) {
        self.pulses = 0;
    }
}

impl ClockPort for MockPlatform {
    fn now_ms(&self) -> u64 {
        self.now_ms
    }

    fn delay_ms(&mut self, ms: u32) {
        self.now_ms += u64::from(ms);
    }

    fn read_rtc(&mut self) -> Result<LocalTime> {
        self.rtc.ok_or(WateringError::RtcFailure)
    }
}

impl EnvironmentPort for MockPlatform {
    fn latest_temperature(&self) -> Option<TemperatureSample> {
        self.sample
    }

    fn refresh_temperature(&mut self) {
        if let Some(c) = self.ambient_c {
            self.sample = Some(TemperatureSample {
                celsius: c,
                taken_at_ms: self.now_ms,
            });
        }
    }
}

impl DemandPort for MockPlatform {
    fn decide(&mut self, _channel: u8) -> Result<DemandDecision> {
        self.demand.ok_or(WateringError::NotInitialized)
    }

    fn apply_missed_days(&mut self, channel: u8, days: u32) -> Result<()> {
        self.missed_days.push((channel, days));
        Ok(())
    }
}

impl RainPort for MockPlatform {
    fn impact(&mut self, _channel: u8) -> RainImpact {
        self.rain
    }
}

impl StoragePort for MockPlatform {
    fn read(
        &self,
        namespace: &str,
        key: &str,
        buf: &mut [u8],
    ) -> core::result::Result<usize, StorageError> {
        let blob = self
            .store
            .get(&(namespace.to_string(), key.to_string()))
            .ok_or(StorageError::NotFound)?;
        if blob.len() > buf.len() {
            return Err(StorageError::Corrupted);
        }
        buf[..blob.len()].copy_from_slice(blob);
        Ok(blob.len())
    }

    fn write(
        &mut self,
        namespace: &str,
        key: &str,
        data: &[u8],
    ) -> core::result::Result<(), StorageError> {
        self.store
            .insert((namespace.to_string(), key.to_string()), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> core::result::Result<(), StorageError> {
        self.store
            .remove(&(namespace.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.store
            .contains_key(&(namespace.to_string(), key.to_string()))
    }
}

impl EventSink for MockPlatform {
    fn emit(&mut self, event: &WateringEvent) {
        self.events.push(event.clone());
    }
}

// ── Fixtures ──────────────────────────────────────────────────

/// Initialised system on a warm mock with default configuration.
#[allow(dead_code)]
pub fn system() -> WateringSystem<MockPlatform> {
    system_with(SystemConfig::default())
}

#[allow(dead_code)]
pub fn system_with(config: SystemConfig) -> WateringSystem<MockPlatform> {
    let mut sys = WateringSystem::new(MockPlatform::new(), config).unwrap();
    sys.init().unwrap();
    sys.platform_mut().clear_history();
    sys
}

/// Advance simulated time by `ms` and run one task-loop pass.
#[allow(dead_code)]
pub fn tick_after(sys: &mut WateringSystem<MockPlatform>, ms: u64) {
    sys.platform_mut().advance(ms);
    sys.tick();
}
