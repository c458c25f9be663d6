//! Wall-clock source with RTC failure tracking.
//!
//! Every scheduler pass asks [`WallClock::now_local`] for local time.  A
//! successful RTC read is cached together with the monotonic time it was
//! taken at.  When reads fail, the last good reading is advanced by the
//! monotonic time elapsed since, which drifts but keeps schedules firing.
//! After `threshold` consecutive failures the clock reports itself
//! degraded and the system status becomes `RtcError` until a read succeeds.

use log::{error, info, warn};

use crate::app::ports::ClockPort;
use crate::model::LocalTime;

#[derive(Debug)]
pub struct WallClock {
    threshold: u8,
    consecutive_failures: u8,
    degraded: bool,
    last_good: Option<(LocalTime, u64)>,
}

impl WallClock {
    pub const fn new(threshold: u8) -> Self {
        Self {
            threshold,
            consecutive_failures: 0,
            degraded: false,
            last_good: None,
        }
    }

    pub fn now_local(&mut self, clock: &mut impl ClockPort) -> LocalTime {
        let now_ms = clock.now_ms();
        match clock.read_rtc() {
            Ok(t) => {
                if self.degraded {
                    info!(
                        "RTC recovered after {} failed reads",
                        self.consecutive_failures
                    );
                }
                self.consecutive_failures = 0;
                self.degraded = false;
                self.last_good = Some((t, now_ms));
                t
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if !self.degraded && self.consecutive_failures >= self.threshold {
                    self.degraded = true;
                    error!(
                        "RTC failed {} times in a row ({e}); using monotonic fallback",
                        self.consecutive_failures
                    );
                } else if !self.degraded {
                    warn!("RTC read failed: {e}");
                }
                self.fallback(now_ms)
            }
        }
    }

    fn fallback(&self, now_ms: u64) -> LocalTime {
        match self.last_good {
            Some((t, at_ms)) => t.advanced_by_minutes(now_ms.saturating_sub(at_ms) / 60_000),
            None => LocalTime::default().advanced_by_minutes(now_ms / 60_000),
        }
    }

    pub const fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub const fn consecutive_failures(&self) -> u8 {
        self.consecutive_failures
    }
}
