//! Domain data model: channels, schedules, tasks and local time.
//!
//! Channels live in a fixed table owned by the watering system and are
//! always referred to by index.  A [`Task`] carries a `channel: u8`, never
//! a reference, so a task outliving a configuration write can at worst name
//! a channel that gets bounds-checked on use.

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;
use crate::config::SystemConfig;

/// Number of irrigation zones on the board.
pub const MAX_CHANNELS: usize = 8;

/// Capacity of the pending-task FIFO.
pub const QUEUE_CAPACITY: usize = 10;

/// Maximum channel name length in bytes.
pub const CHANNEL_NAME_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// What a task is trying to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Target {
    Duration { minutes: u16 },
    Volume { liters: f32 },
}

impl Target {
    /// Check the target against the configured limits.
    pub fn validate(&self, cfg: &SystemConfig) -> Result<(), ConfigError> {
        match *self {
            Self::Duration { minutes } => {
                if minutes == 0 {
                    return Err(ConfigError::ValidationFailed("duration must be non-zero"));
                }
                if minutes < cfg.min_duration_min || minutes > cfg.max_duration_min {
                    return Err(ConfigError::ValidationFailed("duration outside limits"));
                }
            }
            Self::Volume { liters } => {
                if !liters.is_finite() || liters <= 0.0 {
                    return Err(ConfigError::ValidationFailed("volume must be positive"));
                }
                if liters < cfg.min_volume_l || liters > cfg.max_volume_l {
                    return Err(ConfigError::ValidationFailed("volume outside limits"));
                }
            }
        }
        Ok(())
    }

    /// Scale the target down by `pct` percent, keeping at least one unit.
    pub fn reduced_by(self, pct: f32) -> Self {
        let pct = pct.clamp(0.0, 100.0);
        if pct <= 0.0 {
            return self;
        }
        let factor = 1.0 - pct / 100.0;
        match self {
            Self::Duration { minutes } => {
                let m = (f32::from(minutes) * factor).round() as u16;
                Self::Duration { minutes: m.max(1) }
            }
            Self::Volume { liters } => Self::Volume {
                liters: (liters * factor).max(0.1),
            },
        }
    }
}

/// Who asked for the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    Manual,
    Scheduled,
    Remote,
}

/// A unit of watering work.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Task {
    pub channel: u8,
    pub target: Target,
    pub trigger: Trigger,
}

impl Task {
    pub const fn duration(channel: u8, minutes: u16, trigger: Trigger) -> Self {
        Self {
            channel,
            target: Target::Duration { minutes },
            trigger,
        }
    }

    pub const fn volume(channel: u8, liters: f32, trigger: Trigger) -> Self {
        Self {
            channel,
            target: Target::Volume { liters },
            trigger,
        }
    }
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

/// Day-of-week bit for `Daily` masks.  Bit 0 is Sunday.
pub const fn weekday_bit(day_of_week: u8) -> u8 {
    1 << (day_of_week % 7)
}

/// Monday to Friday.
pub const WEEKDAYS: u8 = 0b0011_1110;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleKind {
    /// Water on every day whose bit is set (bit 0 = Sunday).
    Daily { days_of_week: u8 },
    /// Water every `interval_days` days.
    Periodic { interval_days: u16 },
    /// Let the irrigation-demand collaborator decide once per day.
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTime {
    pub hour: u8,
    pub minute: u8,
}

impl StartTime {
    pub const fn minutes_of_day(self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }

    pub const fn from_minutes(minutes: u16) -> Self {
        let m = minutes % (24 * 60);
        Self {
            hour: (m / 60) as u8,
            minute: (m % 60) as u8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolarEvent {
    Sunrise,
    Sunset,
}

/// Start relative to sunrise/sunset instead of a fixed clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolarTiming {
    pub event: SolarEvent,
    pub offset_minutes: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub kind: ScheduleKind,
    pub start: StartTime,
    pub target: Target,
    pub enabled: bool,
    pub solar: Option<SolarTiming>,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            kind: ScheduleKind::Daily { days_of_week: 0 },
            start: StartTime { hour: 6, minute: 0 },
            target: Target::Duration { minutes: 5 },
            enabled: false,
            solar: None,
        }
    }
}

impl Schedule {
    pub fn validate(&self, cfg: &SystemConfig) -> Result<(), ConfigError> {
        if self.start.hour > 23 || self.start.minute > 59 {
            return Err(ConfigError::ValidationFailed("start time out of range"));
        }
        match self.kind {
            ScheduleKind::Daily { days_of_week } if days_of_week > 0x7F => {
                return Err(ConfigError::ValidationFailed("day mask has bits above Saturday"));
            }
            ScheduleKind::Periodic { interval_days: 0 } => {
                return Err(ConfigError::ValidationFailed("interval must be non-zero"));
            }
            _ => {}
        }
        if self
            .solar
            .is_some_and(|solar| solar.offset_minutes.unsigned_abs() > 720)
        {
            return Err(ConfigError::ValidationFailed("solar offset beyond 12 h"));
        }
        // AUTO sizes its own volume; the stored target is only a fallback.
        if self.kind != ScheduleKind::Auto {
            self.target.validate(cfg)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Hydraulic profile
// ---------------------------------------------------------------------------

/// Runs averaged before a profile is considered calibrated.
pub const PROFILE_LEARNING_RUNS: u8 = 3;

/// Result of feeding one completed run into a [`HydraulicProfile`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProfileOutcome {
    StillLearning,
    Calibrated { nominal_ml_min: f32 },
    Normal,
    HighFlow { measured_ml_min: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HydraulicProfile {
    pub nominal_ml_min: f32,
    pub high_tolerance_pct: u8,
    pub calibrated: bool,
    learning_runs: u8,
    learning_sum_ml_min: f32,
}

impl Default for HydraulicProfile {
    fn default() -> Self {
        Self {
            nominal_ml_min: 0.0,
            high_tolerance_pct: 30,
            calibrated: false,
            learning_runs: 0,
            learning_sum_ml_min: 0.0,
        }
    }
}

impl HydraulicProfile {
    /// Feed the mean flow of a completed run.  Runs with no flow are ignored.
    pub fn record_run(&mut self, measured_ml_min: f32) -> ProfileOutcome {
        if !measured_ml_min.is_finite() || measured_ml_min <= 0.0 {
            return if self.calibrated {
                ProfileOutcome::Normal
            } else {
                ProfileOutcome::StillLearning
            };
        }
        if !self.calibrated {
            self.learning_runs += 1;
            self.learning_sum_ml_min += measured_ml_min;
            if self.learning_runs < PROFILE_LEARNING_RUNS {
                return ProfileOutcome::StillLearning;
            }
            self.nominal_ml_min = self.learning_sum_ml_min / f32::from(self.learning_runs);
            self.calibrated = true;
            self.learning_runs = 0;
            self.learning_sum_ml_min = 0.0;
            return ProfileOutcome::Calibrated {
                nominal_ml_min: self.nominal_ml_min,
            };
        }
        let limit = self.nominal_ml_min * (1.0 + f32::from(self.high_tolerance_pct) / 100.0);
        if measured_ml_min > limit {
            ProfileOutcome::HighFlow { measured_ml_min }
        } else {
            ProfileOutcome::Normal
        }
    }
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f32,
    pub longitude: f32,
}

/// Why the last scheduled or requested run on a channel did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Rain,
    Freeze,
    HydraulicLock,
}

impl SkipReason {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Rain => "rain",
            Self::Freeze => "freeze",
            Self::HydraulicLock => "hydraulic lock",
        }
    }
}

/// One irrigation zone.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: u8,
    pub name: heapless::String<CHANNEL_NAME_LEN>,
    pub schedule: Schedule,
    pub location: Option<GeoLocation>,
    pub profile: HydraulicProfile,
    /// Day ordinal a periodic schedule counts its interval from.
    pub periodic_anchor_day: Option<u32>,
    pub last_watering_ms: Option<u64>,
    pub active: bool,
    pub completed_tasks: u32,
    pub last_skip: Option<SkipReason>,
}

impl Channel {
    pub fn new(id: u8) -> Self {
        let mut name = heapless::String::new();
        // "Channel 255" fits comfortably in the buffer.
        let _ = core::fmt::Write::write_fmt(&mut name, format_args!("Channel {}", id + 1));
        Self {
            id,
            name,
            schedule: Schedule::default(),
            location: None,
            profile: HydraulicProfile::default(),
            periodic_anchor_day: None,
            last_watering_ms: None,
            active: false,
            completed_tasks: 0,
            last_skip: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Local time
// ---------------------------------------------------------------------------

pub const fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub const fn days_in_year(year: u16) -> u16 {
    if is_leap_year(year) { 366 } else { 365 }
}

/// Broken-down local wall time as delivered by the RTC/timezone service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    pub year: u16,
    /// Day of year, 1-based.
    pub julian_day: u16,
    pub hour: u8,
    pub minute: u8,
    /// 0 = Sunday.
    pub day_of_week: u8,
    /// Offset of local time from UTC.
    pub utc_offset_minutes: i16,
}

impl LocalTime {
    pub const fn minutes_of_day(&self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }

    /// Continuous day number across year boundaries (proleptic Gregorian).
    pub const fn day_ordinal(&self) -> u32 {
        let y = self.year.saturating_sub(1) as u32;
        365 * y + y / 4 - y / 100 + y / 400 + self.julian_day as u32
    }

    /// Wall time `minutes` later, rolling over day, week and year.
    pub fn advanced_by_minutes(&self, minutes: u64) -> Self {
        let mut t = *self;
        let total = u64::from(t.minutes_of_day()) + minutes;
        let mut days = total / (24 * 60);
        let rem = (total % (24 * 60)) as u16;
        t.hour = (rem / 60) as u8;
        t.minute = (rem % 60) as u8;
        t.day_of_week = ((u64::from(t.day_of_week) + days % 7) % 7) as u8;
        while days > 0 {
            let left_in_year = u64::from(days_in_year(t.year).saturating_sub(t.julian_day));
            if days <= left_in_year {
                t.julian_day += days as u16;
                days = 0;
            } else {
                days -= left_in_year + 1;
                t.year += 1;
                t.julian_day = 1;
            }
        }
        t
    }
}

impl Default for LocalTime {
    /// 2024-01-01 00:00, a Monday.  Used when the RTC has never been read.
    fn default() -> Self {
        Self {
            year: 2024,
            julian_day: 1,
            hour: 0,
            minute: 0,
            day_of_week: 1,
            utc_offset_minutes: 0,
        }
    }
}
