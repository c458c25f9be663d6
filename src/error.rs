//! Unified error types for the irrigation controller.
//!
//! Every fallible operation in the watering engine returns
//! [`WateringError`].  All variants are `Copy` so they can be handed back
//! across the command surface and stored in the active-task bookkeeping
//! without allocation.  Port-level errors ([`StorageError`],
//! [`ConfigError`]) convert into it with `?`.

use core::fmt;

use crate::app::ports::{ConfigError, StorageError};

// ---------------------------------------------------------------------------
// Top-level watering error
// ---------------------------------------------------------------------------

/// Error taxonomy shared by the task manager, scheduler, valve coordinator,
/// flow monitor and safety gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WateringError {
    /// Channel index out of range, zero target, or target outside limits.
    InvalidParam,
    /// The subsystem has not been initialised yet.
    NotInitialized,
    /// A valve output could not be driven within the retry window.
    Hardware,
    /// The request is vetoed for now (valve limit, safety gate, lock contention).
    Busy,
    /// The task queue is at capacity.
    QueueFull,
    /// A bounded wait expired.
    Timeout,
    /// The request conflicts with the current configuration.
    Config,
    /// The real-time clock could not be read.
    RtcFailure,
    /// Persistent storage failed.
    Storage,
    /// Stored or received data failed to decode or validate.
    InvalidData,
}

impl fmt::Display for WateringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParam => write!(f, "invalid parameter"),
            Self::NotInitialized => write!(f, "not initialised"),
            Self::Hardware => write!(f, "hardware fault"),
            Self::Busy => write!(f, "busy"),
            Self::QueueFull => write!(f, "task queue full"),
            Self::Timeout => write!(f, "timed out"),
            Self::Config => write!(f, "configuration conflict"),
            Self::RtcFailure => write!(f, "RTC read failed"),
            Self::Storage => write!(f, "storage error"),
            Self::InvalidData => write!(f, "invalid data"),
        }
    }
}

impl From<StorageError> for WateringError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound | StorageError::Full | StorageError::IoError => Self::Storage,
            StorageError::Corrupted => Self::InvalidData,
        }
    }
}

impl From<ConfigError> for WateringError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::ValidationFailed(_) => Self::InvalidParam,
            ConfigError::Corrupted => Self::InvalidData,
            ConfigError::NotFound | ConfigError::StorageFull | ConfigError::IoError => {
                Self::Storage
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Actuator errors
// ---------------------------------------------------------------------------

/// Raw failure reported by a valve output before retry handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// GPIO set failed.
    GpioWriteFailed,
    /// The addressed output does not exist on this board.
    NoSuchOutput,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GpioWriteFailed => write!(f, "GPIO write failed"),
            Self::NoSuchOutput => write!(f, "no such output"),
        }
    }
}

impl From<ActuatorError> for WateringError {
    fn from(_: ActuatorError) -> Self {
        Self::Hardware
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, WateringError>;
