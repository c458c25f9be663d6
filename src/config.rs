//! System configuration parameters
//!
//! All tunable parameters for the irrigation controller.  Values are
//! persisted with postcard through the storage port and validated before
//! they are accepted; out-of-range values are rejected, never clamped.

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;
use crate::model::MAX_CHANNELS;
use crate::power::PowerMode;

/// No single task runs longer than this, whatever the configuration says.
pub const HARD_CEILING_MIN: u16 = 30;

/// Upper bound on retrying one valve write.
pub const MAX_VALVE_RETRY_MS: u32 = 200;

/// Electrical sense of a valve output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarity {
    /// Driving the pin high energises the valve.
    ActiveHigh,
    /// Driving the pin low energises the valve.
    ActiveLow,
}

impl Polarity {
    /// Pin level that corresponds to the requested valve state.
    pub const fn level(self, open: bool) -> bool {
        match self {
            Self::ActiveHigh => open,
            Self::ActiveLow => !open,
        }
    }
}

/// Upstream master valve sequencing.
///
/// Delays are signed seconds: a positive pre-start delay opens the master
/// ahead of the zone, a negative one opens the zone first.  A negative
/// post-stop delay closes the master ahead of the zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterValveConfig {
    pub enabled: bool,
    pub pre_start_delay_s: i16,
    pub post_stop_delay_s: i16,
    /// Keep the master open if the next task is expected within this window.
    pub overlap_grace_s: u16,
    /// When false the master is driven only through the manual API.
    pub auto_management: bool,
}

impl Default for MasterValveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pre_start_delay_s: 3,
            post_stop_delay_s: 2,
            overlap_grace_s: 5,
            auto_management: true,
        }
    }
}

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    // --- Task limits ---
    pub min_duration_min: u16,
    pub max_duration_min: u16,
    pub min_volume_l: f32,
    pub max_volume_l: f32,
    /// Task ceiling, regardless of mode.  Never above [`HARD_CEILING_MIN`].
    pub max_task_minutes: u16,

    // --- Flow monitoring ---
    /// Throttle for the heavier flow checks.
    pub flow_check_interval_ms: u32,
    /// Zero pulses after this long into a task means no flow.
    pub no_flow_start_grace_ms: u32,
    /// No pulse increase for this long means the flow stalled.
    pub no_flow_stall_timeout_ms: u32,
    pub max_no_flow_attempts: u8,
    /// Pulses seen with every valve closed before a leak is declared.
    pub unexpected_flow_threshold: u32,
    pub default_pulses_per_liter: u32,

    // --- Valves ---
    pub master: MasterValveConfig,
    pub zone_polarity: [Polarity; MAX_CHANNELS],
    /// Total time a valve write may be retried before it counts as a hardware fault.
    pub valve_retry_window_ms: u32,

    // --- Anti-freeze ---
    pub freeze_lock_c: f32,
    pub freeze_clear_c: f32,
    pub temperature_stale_ms: u32,
    pub freeze_alarm_interval_ms: u32,

    // --- Locking / backpressure ---
    pub command_lock_timeout_ms: u32,
    pub scheduler_backpressure_depth: u8,
    pub soft_lock_retry_ms: u32,

    // --- Clock ---
    pub rtc_failure_threshold: u8,

    // --- Power ---
    pub power_mode: PowerMode,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            // Task limits
            min_duration_min: 1,
            max_duration_min: 30,
            min_volume_l: 1.0,
            max_volume_l: 1000.0,
            max_task_minutes: 30,

            // Flow monitoring
            flow_check_interval_ms: 5_000,
            no_flow_start_grace_ms: 5_000,
            no_flow_stall_timeout_ms: 15_000,
            max_no_flow_attempts: 3,
            unexpected_flow_threshold: 10,
            default_pulses_per_liter: 750,

            // Valves
            master: MasterValveConfig::default(),
            zone_polarity: [Polarity::ActiveHigh; MAX_CHANNELS],
            valve_retry_window_ms: 200,

            // Anti-freeze
            freeze_lock_c: 2.0,
            freeze_clear_c: 4.0,
            temperature_stale_ms: 10 * 60 * 1000,
            freeze_alarm_interval_ms: 60_000,

            // Locking / backpressure
            command_lock_timeout_ms: 100,
            scheduler_backpressure_depth: 2,
            soft_lock_retry_ms: 60 * 60 * 1000,

            // Clock
            rtc_failure_threshold: 3,

            // Power
            power_mode: PowerMode::Normal,
        }
    }
}

impl SystemConfig {
    /// Range-check every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_duration_min == 0 || self.min_duration_min > self.max_duration_min {
            return Err(ConfigError::ValidationFailed(
                "duration limits must satisfy 0 < min <= max",
            ));
        }
        if self.max_duration_min > HARD_CEILING_MIN {
            return Err(ConfigError::ValidationFailed("max duration exceeds the task ceiling"));
        }
        if !(self.min_volume_l > 0.0 && self.min_volume_l <= self.max_volume_l)
            || !self.max_volume_l.is_finite()
        {
            return Err(ConfigError::ValidationFailed(
                "volume limits must satisfy 0 < min <= max",
            ));
        }
        if self.max_task_minutes == 0 || self.max_task_minutes > HARD_CEILING_MIN {
            return Err(ConfigError::ValidationFailed("task ceiling must be 1..=30 minutes"));
        }
        if self.flow_check_interval_ms == 0 || self.no_flow_stall_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("flow timings must be non-zero"));
        }
        if self.max_no_flow_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "at least one no-flow attempt required",
            ));
        }
        if self.unexpected_flow_threshold < 2 {
            return Err(ConfigError::ValidationFailed(
                "unexpected-flow threshold must be >= 2",
            ));
        }
        if self.default_pulses_per_liter == 0 {
            return Err(ConfigError::ValidationFailed("calibration must be non-zero"));
        }
        if self.master.pre_start_delay_s.unsigned_abs() > 300
            || self.master.post_stop_delay_s.unsigned_abs() > 300
            || self.master.overlap_grace_s > 600
        {
            return Err(ConfigError::ValidationFailed("master valve timing out of range"));
        }
        if self.valve_retry_window_ms == 0 || self.valve_retry_window_ms > MAX_VALVE_RETRY_MS {
            return Err(ConfigError::ValidationFailed("valve retry window out of range"));
        }
        if !self.freeze_lock_c.is_finite()
            || !self.freeze_clear_c.is_finite()
            || self.freeze_clear_c <= self.freeze_lock_c
        {
            return Err(ConfigError::ValidationFailed(
                "freeze clear threshold must exceed lock threshold",
            ));
        }
        if self.temperature_stale_ms == 0 {
            return Err(ConfigError::ValidationFailed("staleness window must be non-zero"));
        }
        if self.command_lock_timeout_ms == 0 || self.command_lock_timeout_ms > 1_000 {
            return Err(ConfigError::ValidationFailed("lock timeout out of range"));
        }
        if self.rtc_failure_threshold == 0 {
            return Err(ConfigError::ValidationFailed("RTC failure threshold must be non-zero"));
        }
        Ok(())
    }

    /// Effective task ceiling in milliseconds, clamped to the hard ceiling
    /// even if an unvalidated value slipped in.
    pub fn max_task_ms(&self) -> u64 {
        u64::from(self.max_task_minutes.min(HARD_CEILING_MIN)) * 60_000
    }
}
