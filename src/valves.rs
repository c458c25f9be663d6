//! Valve coordinator.
//!
//! Drives the zone valves and the upstream master valve.  At most one zone
//! may be energised at a time; a second `channel_on` is refused with
//! `Busy`.  When auto-management is on, the master valve is sequenced
//! around the zone:
//!
//! ```text
//!  pre > 0 : master ─(pre)─▶ zone            post < 0 : master ─(|post|)─▶ zone closed
//!  pre = 0 : zone ▶ master                   post ≥ 0 : zone closed, master later
//!  pre < 0 : zone ─(|pre|)─▶ master
//! ```
//!
//! Closing the master after the last zone is deferred when another task
//! is expected within the overlap-grace window, or by `post` seconds.
//! Deferred closes are plain deadlines checked by [`ValveCoordinator::poll`].
//!
//! Every pin write is retried for a bounded window before it is reported
//! as [`WateringError::Hardware`].  Bookkeeping is updated even when the
//! write fails so a dead solenoid cannot leave a channel marked active.

use log::{debug, error, info, warn};

use crate::app::events::WateringEvent;
use crate::app::ports::{ClockPort, EventSink, FlowSensorPort, ValveId, ValvePort};
use crate::config::{MasterValveConfig, Polarity, SystemConfig};
use crate::error::{Result, WateringError};
use crate::model::{Channel, MAX_CHANNELS};

/// Pause between write attempts.
const RETRY_STEP_MS: u32 = 10;

/// Master valve drive is fixed active-low.
const MASTER_POLARITY: Polarity = Polarity::ActiveLow;

/// Hardware surface the coordinator drives.
pub trait ValveHw: ValvePort + ClockPort + FlowSensorPort + EventSink {}
impl<T: ValvePort + ClockPort + FlowSensorPort + EventSink> ValveHw for T {}

/// Upcoming task start the master valve should stay open for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterSchedule {
    pub expected_start_ms: u64,
    pub pending: bool,
}

pub struct ValveCoordinator {
    master_cfg: MasterValveConfig,
    polarity: [Polarity; MAX_CHANNELS],
    retry_window_ms: u32,

    active_count: u8,
    master_open: bool,
    next_start: MasterSchedule,
    deferred_close_at: Option<u64>,
}

impl ValveCoordinator {
    pub fn new(config: &SystemConfig) -> Self {
        Self {
            master_cfg: config.master,
            polarity: config.zone_polarity,
            retry_window_ms: config.valve_retry_window_ms,
            active_count: 0,
            master_open: false,
            next_start: MasterSchedule {
                expected_start_ms: 0,
                pending: false,
            },
            deferred_close_at: None,
        }
    }

    pub fn reconfigure(&mut self, config: &SystemConfig) {
        self.master_cfg = config.master;
        self.polarity = config.zone_polarity;
        self.retry_window_ms = config.valve_retry_window_ms;
    }

    fn master_managed(&self) -> bool {
        self.master_cfg.enabled && self.master_cfg.auto_management
    }

    // ── Queries ───────────────────────────────────────────────────

    pub const fn active_count(&self) -> u8 {
        self.active_count
    }

    pub const fn is_master_open(&self) -> bool {
        self.master_open
    }

    pub const fn deferred_close_at(&self) -> Option<u64> {
        self.deferred_close_at
    }

    pub const fn next_start(&self) -> MasterSchedule {
        self.next_start
    }

    // ── Master planning ───────────────────────────────────────────

    /// Record when the next task is expected to start.
    pub fn notify_next_start(&mut self, expected_start_ms: u64) {
        self.next_start = MasterSchedule {
            expected_start_ms,
            pending: true,
        };
        debug!("VALVE next task expected at {} ms", expected_start_ms);
    }

    // ── Zone control ──────────────────────────────────────────────

    pub fn channel_on(
        &mut self,
        channels: &mut [Channel; MAX_CHANNELS],
        id: u8,
        hw: &mut impl ValveHw,
    ) -> Result<()> {
        let idx = usize::from(id);
        let Some(channel) = channels.get(idx) else {
            return Err(WateringError::InvalidParam);
        };
        if self.active_count >= 1 || channel.active {
            warn!("VALVE channel {} refused: a zone is already active", id);
            return Err(WateringError::Busy);
        }

        if self.master_managed() {
            if self.master_open {
                if self.deferred_close_at.take().is_some() {
                    info!("VALVE master close cancelled: channel {} starting", id);
                }
                self.drive_zone(id, true, hw)?;
            } else if self.master_cfg.pre_start_delay_s > 0 {
                self.set_master(true, hw)?;
                hw.delay_ms(delay_ms(self.master_cfg.pre_start_delay_s));
                if let Err(e) = self.drive_zone(id, true, hw) {
                    if let Err(close) = self.set_master(false, hw) {
                        error!("VALVE master rollback after zone {} failure failed: {close}", id);
                    }
                    return Err(e);
                }
            } else {
                self.drive_zone(id, true, hw)?;
                if self.master_cfg.pre_start_delay_s < 0 {
                    hw.delay_ms(delay_ms(self.master_cfg.pre_start_delay_s));
                }
                if let Err(e) = self.set_master(true, hw) {
                    if let Err(close) = self.drive_zone(id, false, hw) {
                        error!("VALVE zone {} rollback after master failure failed: {close}", id);
                    }
                    return Err(e);
                }
            }
        } else {
            self.drive_zone(id, true, hw)?;
        }

        channels[idx].active = true;
        self.active_count = 1;
        self.next_start.pending = false;
        info!("VALVE zone {} open", id);
        hw.emit(&WateringEvent::ZoneValve {
            channel: id,
            open: true,
        });
        Ok(())
    }

    pub fn channel_off(
        &mut self,
        channels: &mut [Channel; MAX_CHANNELS],
        id: u8,
        hw: &mut impl ValveHw,
    ) -> Result<()> {
        let idx = usize::from(id);
        if idx >= MAX_CHANNELS {
            return Err(WateringError::InvalidParam);
        }
        if !channels[idx].active {
            debug!("VALVE zone {} already closed", id);
            return Ok(());
        }

        let mut result = Ok(());
        let managed = self.master_managed();

        if managed && self.master_cfg.post_stop_delay_s < 0 && self.master_open {
            if let Err(e) = self.set_master(false, hw) {
                result = Err(e);
            }
            hw.delay_ms(delay_ms(self.master_cfg.post_stop_delay_s));
        }
        if let Err(e) = self.drive_zone(id, false, hw) {
            result = Err(e);
        }

        channels[idx].active = false;
        self.active_count = self.active_count.saturating_sub(1);
        info!("VALVE zone {} closed", id);
        hw.emit(&WateringEvent::ZoneValve {
            channel: id,
            open: false,
        });

        if self.active_count == 0 {
            if managed && self.master_open {
                let now = hw.now_ms();
                let grace_ms = u64::from(self.master_cfg.overlap_grace_s) * 1_000;
                let next = self.next_start;
                if next.pending && next.expected_start_ms <= now + grace_ms {
                    let deadline = next.expected_start_ms.max(now) + grace_ms;
                    info!("VALVE master kept open for next task until {} ms", deadline);
                    self.deferred_close_at = Some(deadline);
                } else if self.master_cfg.post_stop_delay_s > 0 {
                    self.deferred_close_at =
                        Some(now + u64::from(delay_ms(self.master_cfg.post_stop_delay_s)));
                } else if let Err(e) = self.set_master(false, hw) {
                    result = Err(e);
                }
            }
            hw.reset_pulses();
        }
        result
    }

    /// De-energise a zone while keeping its reservation (task paused).
    pub fn suspend_output(&mut self, id: u8, hw: &mut impl ValveHw) -> Result<()> {
        let r = self.drive_zone(id, false, hw);
        hw.emit(&WateringEvent::ZoneValve {
            channel: id,
            open: false,
        });
        r
    }

    /// Re-energise a suspended zone.
    pub fn resume_output(&mut self, id: u8, hw: &mut impl ValveHw) -> Result<()> {
        self.drive_zone(id, true, hw)?;
        hw.emit(&WateringEvent::ZoneValve {
            channel: id,
            open: true,
        });
        Ok(())
    }

    /// Close every zone and the master, attempting all of them even if
    /// some fail.  Returns the last error seen.
    pub fn close_all(
        &mut self,
        channels: &mut [Channel; MAX_CHANNELS],
        hw: &mut impl ValveHw,
    ) -> Result<()> {
        let mut result = Ok(());
        for ch in channels.iter_mut() {
            if let Err(e) = self.drive_zone(ch.id, false, hw) {
                result = Err(e);
            }
            if ch.active {
                ch.active = false;
                hw.emit(&WateringEvent::ZoneValve {
                    channel: ch.id,
                    open: false,
                });
            }
        }
        self.active_count = 0;
        self.deferred_close_at = None;
        self.next_start.pending = false;
        if self.master_cfg.enabled {
            if let Err(e) = self.set_master(false, hw) {
                result = Err(e);
            }
        }
        hw.reset_pulses();
        warn!("VALVE close-all executed");
        result
    }

    /// Close the master once a deferred deadline has passed.
    pub fn poll(&mut self, hw: &mut impl ValveHw) -> Result<()> {
        let Some(deadline) = self.deferred_close_at else {
            return Ok(());
        };
        if hw.now_ms() < deadline {
            return Ok(());
        }
        self.deferred_close_at = None;
        self.next_start.pending = false;
        if self.active_count == 0 && self.master_open {
            info!("VALVE deferred master close");
            self.set_master(false, hw)?;
            hw.reset_pulses();
        }
        Ok(())
    }

    // ── Manual master control ─────────────────────────────────────

    pub fn open_master_manual(&mut self, hw: &mut impl ValveHw) -> Result<()> {
        self.manual_guard()?;
        self.set_master(true, hw)
    }

    pub fn close_master_manual(&mut self, hw: &mut impl ValveHw) -> Result<()> {
        self.manual_guard()?;
        self.set_master(false, hw)
    }

    fn manual_guard(&self) -> Result<()> {
        if !self.master_cfg.enabled || self.master_cfg.auto_management {
            warn!("VALVE manual master control refused while auto-managed or disabled");
            return Err(WateringError::Config);
        }
        Ok(())
    }

    // ── Pin driving ───────────────────────────────────────────────

    fn drive_zone(&self, id: u8, open: bool, hw: &mut impl ValveHw) -> Result<()> {
        let polarity = self
            .polarity
            .get(usize::from(id))
            .copied()
            .ok_or(WateringError::InvalidParam)?;
        self.write_with_retry(ValveId::Zone(id), polarity.level(open), hw)
    }

    fn set_master(&mut self, open: bool, hw: &mut impl ValveHw) -> Result<()> {
        if !self.master_cfg.enabled {
            return Ok(());
        }
        let r = self.write_with_retry(ValveId::Master, MASTER_POLARITY.level(open), hw);
        // A failed close still counts as closed for sequencing purposes.
        if r.is_ok() || !open {
            if self.master_open != open {
                info!("VALVE master {}", if open { "open" } else { "closed" });
                hw.emit(&WateringEvent::MasterValve { open });
            }
            self.master_open = open;
        }
        if !open {
            self.deferred_close_at = None;
        }
        r
    }

    fn write_with_retry(&self, valve: ValveId, level: bool, hw: &mut impl ValveHw) -> Result<()> {
        let deadline = hw.now_ms() + u64::from(self.retry_window_ms);
        loop {
            match hw.write(valve, level) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if hw.now_ms() >= deadline {
                        error!("VALVE {:?} write failed after {} ms: {e}", valve, self.retry_window_ms);
                        return Err(WateringError::Hardware);
                    }
                    hw.delay_ms(RETRY_STEP_MS);
                }
            }
        }
    }
}

fn delay_ms(seconds: i16) -> u32 {
    u32::from(seconds.unsigned_abs()) * 1_000
}
