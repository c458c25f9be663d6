//! Power modes and the loop cadences they imply.

use serde::{Deserialize, Serialize};

/// Operating power profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PowerMode {
    #[default]
    Normal,
    EnergySaving,
    UltraLowPower,
}

impl PowerMode {
    /// Period of the task-processing loop (start, completion, flow checks).
    pub const fn task_loop_interval_ms(self) -> u32 {
        match self {
            Self::Normal => 500,
            Self::EnergySaving => 2_000,
            Self::UltraLowPower => 600_000,
        }
    }

    /// Period of the scheduler loop.
    pub const fn scheduler_interval_ms(self) -> u32 {
        match self {
            Self::Normal => 60_000,
            Self::EnergySaving => 120_000,
            Self::UltraLowPower => 300_000,
        }
    }

    /// Width of the scheduler's time-of-day match window, in minutes.
    ///
    /// A schedule matches when the local time falls inside
    /// `[start, start + window)`, so a slower scheduler cadence still
    /// sees every configured start time exactly once.
    pub const fn schedule_window_min(self) -> u16 {
        let m = self.scheduler_interval_ms() / 60_000;
        if m == 0 { 1 } else { m as u16 }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::EnergySaving => "energy-saving",
            Self::UltraLowPower => "ultra-low-power",
        }
    }
}
