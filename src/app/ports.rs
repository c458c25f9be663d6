//! Port traits — the hexagonal boundary between the watering engine and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ WateringSystem (domain)
//! ```
//!
//! Driven adapters (valve outputs, flow sensor, RTC, collaborators,
//! storage, event sinks) implement these traits.  The
//! [`WateringSystem`](super::service::WateringSystem) consumes them via the
//! [`Platform`] bundle, so the domain core never touches hardware directly.

use crate::error::{ActuatorError, Result};
use crate::model::LocalTime;

use super::events::WateringEvent;

// ───────────────────────────────────────────────────────────────
// Valve port (driven adapter: domain → hardware)
// ───────────────────────────────────────────────────────────────

/// Addresses a single valve output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveId {
    Zone(u8),
    Master,
}

/// Write-side port for valve solenoid drivers.
///
/// `level` is the raw pin level; polarity is resolved by the caller.
pub trait ValvePort {
    fn write(&mut self, valve: ValveId, level: bool) -> core::result::Result<(), ActuatorError>;
}

// ───────────────────────────────────────────────────────────────
// Flow sensor port (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// Read side of the debounced pulse counter.
pub trait FlowSensorPort {
    /// Pulses counted since the last reset.
    fn pulse_count(&self) -> u32;

    /// Zero the counter.
    fn reset_pulses(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic time, blocking delays and the wall-clock RTC.
pub trait ClockPort {
    /// Milliseconds since boot.  Never goes backwards.
    fn now_ms(&self) -> u64;

    /// Block the calling thread.
    fn delay_ms(&mut self, ms: u32);

    /// Local wall time from the RTC/timezone service.
    fn read_rtc(&mut self) -> Result<LocalTime>;
}

// ───────────────────────────────────────────────────────────────
// Environment port
// ───────────────────────────────────────────────────────────────

/// One ambient temperature reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureSample {
    pub celsius: f32,
    /// Monotonic timestamp ([`ClockPort::now_ms`] domain).
    pub taken_at_ms: u64,
}

/// Ambient conditions used by the anti-freeze gate.
pub trait EnvironmentPort {
    fn latest_temperature(&self) -> Option<TemperatureSample>;

    /// Take a fresh reading on demand.
    fn refresh_temperature(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Irrigation demand port (AUTO schedules)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemandDecision {
    pub should_water: bool,
    pub volume_liters: f32,
    pub deficit_mm: f32,
}

/// Soil water-balance engine.  Formulas live on the far side of this port.
pub trait DemandPort {
    fn decide(&mut self, channel: u8) -> Result<DemandDecision>;

    /// Catch up the deficit for days the scheduler did not see.
    fn apply_missed_days(&mut self, channel: u8, days: u32) -> Result<()>;
}

// ───────────────────────────────────────────────────────────────
// Rain compensation port
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RainImpact {
    pub skip: bool,
    /// Percentage (0–100) to shave off the task's target.
    pub reduction_pct: f32,
}

pub trait RainPort {
    fn impact(&mut self, channel: u8) -> RainImpact;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`WateringEvent`]s through this port.
/// Adapters decide where they go (serial log, BLE notification, history).
pub trait EventSink {
    fn emit(&mut self, event: &WateringEvent);
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for schedules, locks and calibration.
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic: no partial writes on power loss.
///   The ESP-IDF NVS API guarantees this natively; in-memory simulation
///   achieves it trivially.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(
        &self,
        namespace: &str,
        key: &str,
        buf: &mut [u8],
    ) -> core::result::Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(
        &mut self,
        namespace: &str,
        key: &str,
        data: &[u8],
    ) -> core::result::Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> core::result::Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Platform bundle
// ───────────────────────────────────────────────────────────────

/// Everything the watering engine needs from the board.
///
/// Blanket-implemented, so any type providing every port qualifies.
pub trait Platform:
    ValvePort + FlowSensorPort + ClockPort + EnvironmentPort + DemandPort + RainPort + StoragePort + EventSink
{
}

impl<T> Platform for T where
    T: ValvePort
        + FlowSensorPort
        + ClockPort
        + EnvironmentPort
        + DemandPort
        + RainPort
        + StoragePort
        + EventSink
{
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from configuration validation and loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed integrity / deserialization check.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
    /// Blob exists but could not be decoded.
    Corrupted,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::Corrupted => write!(f, "stored blob corrupted"),
        }
    }
}

impl From<StorageError> for ConfigError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound => Self::NotFound,
            StorageError::Full => Self::StorageFull,
            StorageError::IoError => Self::IoError,
            StorageError::Corrupted => Self::Corrupted,
        }
    }
}
