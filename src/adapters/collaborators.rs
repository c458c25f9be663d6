//! Fallback adapters for the external collaborators.
//!
//! The soil water-balance engine and the rain compensation service live
//! outside this crate.  Boards built without them use these stand-ins:
//! AUTO schedules never fire and rain never vetoes or reduces a task.

use log::debug;

use crate::app::ports::{DemandDecision, DemandPort, RainImpact, RainPort};
use crate::error::{Result, WateringError};

/// Demand engine stand-in: every decision fails, so AUTO channels are
/// skipped and retried the next day.
#[derive(Debug, Default)]
pub struct DemandUnavailable;

impl DemandPort for DemandUnavailable {
    fn decide(&mut self, channel: u8) -> Result<DemandDecision> {
        debug!("demand: no water-balance engine for channel {}", channel);
        Err(WateringError::NotInitialized)
    }

    fn apply_missed_days(&mut self, _channel: u8, _days: u32) -> Result<()> {
        Ok(())
    }
}

/// Rain service stand-in: no skip, no reduction.
#[derive(Debug, Default)]
pub struct NoRainCompensation;

impl RainPort for NoRainCompensation {
    fn impact(&mut self, _channel: u8) -> RainImpact {
        RainImpact::default()
    }
}
