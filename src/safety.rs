//! Safety gate.
//!
//! Evaluated before a task is queued and again before it starts.  Two
//! independent vetoes live here:
//!
//! 1. **Anti-freeze** — ambient temperature at or below the lock threshold
//!    latches a global lockout that only clears once the temperature climbs
//!    back to the (higher) clear threshold.  A missing or stale reading
//!    gets one on-demand refresh; if that still yields nothing usable the
//!    gate locks (fail-closed).
//! 2. **Hydraulic locks** — a global lock plus one per channel, each at
//!    `None`, `Soft` or `Hard`.  Soft locks carry a retry-after time and
//!    are lifted by [`SafetyGate::expire_soft_locks`]; Hard locks need
//!    [`SafetyGate::clear_lock`].
//!
//! A time-boxed [`ManualOverride`] lets direct user commands on one channel
//! through Soft locks and rain skips.  It never bypasses freeze or Hard
//! locks.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::events::{AlarmKind, WateringEvent};
use crate::app::ports::{EnvironmentPort, EventSink};
use crate::config::SystemConfig;
use crate::error::{Result, WateringError};
use crate::model::{MAX_CHANNELS, SkipReason, Trigger};

/// Alarm payload used when no temperature reading is available.
pub const NO_TEMPERATURE: i32 = i32::MIN;

// ---------------------------------------------------------------------------
// Hydraulic locks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockLevel {
    #[default]
    None,
    Soft,
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockReason {
    #[default]
    None,
    /// Set through the command surface.
    Admin,
    /// Measured flow above the learned profile.
    HighFlow,
}

impl LockReason {
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Admin => "admin",
            Self::HighFlow => "high flow",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HydraulicLock {
    pub level: LockLevel,
    pub reason: LockReason,
    pub locked_at_ms: u64,
    /// Soft locks only; ignored for Hard.
    pub retry_after_ms: u64,
}

impl HydraulicLock {
    pub const fn is_locked(&self) -> bool {
        !matches!(self.level, LockLevel::None)
    }
}

/// Persisted lock state: `global` followed by one entry per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LockTable {
    pub global: HydraulicLock,
    pub channels: [HydraulicLock; MAX_CHANNELS],
}

/// Which lock an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Global,
    Channel(u8),
}

impl LockScope {
    pub const fn channel(self) -> Option<u8> {
        match self {
            Self::Global => None,
            Self::Channel(c) => Some(c),
        }
    }
}

/// Temporary permission for direct commands on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualOverride {
    pub channel: u8,
    pub expires_at_ms: u64,
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

pub struct SafetyGate {
    lock_c: f32,
    clear_c: f32,
    stale_ms: u64,
    alarm_interval_ms: u64,

    freeze_locked: bool,
    last_freeze_alarm_ms: Option<u64>,
    last_temperature_c: Option<f32>,

    locks: LockTable,
    manual_override: Option<ManualOverride>,
}

impl SafetyGate {
    pub fn new(config: &SystemConfig) -> Self {
        Self {
            lock_c: config.freeze_lock_c,
            clear_c: config.freeze_clear_c,
            stale_ms: u64::from(config.temperature_stale_ms),
            alarm_interval_ms: u64::from(config.freeze_alarm_interval_ms),
            freeze_locked: false,
            last_freeze_alarm_ms: None,
            last_temperature_c: None,
            locks: LockTable::default(),
            manual_override: None,
        }
    }

    /// Pick up new thresholds without dropping locks or the freeze latch.
    pub fn reconfigure(&mut self, config: &SystemConfig) {
        self.lock_c = config.freeze_lock_c;
        self.clear_c = config.freeze_clear_c;
        self.stale_ms = u64::from(config.temperature_stale_ms);
        self.alarm_interval_ms = u64::from(config.freeze_alarm_interval_ms);
    }

    // ── Anti-freeze ───────────────────────────────────────────────

    /// Re-read ambient temperature and update the freeze latch.
    ///
    /// Emits a rate-limited `Freeze` alarm while locked.  Returns whether
    /// the gate is locked afterwards.
    pub fn evaluate_freeze(&mut self, env: &mut (impl EnvironmentPort + EventSink), now_ms: u64) -> bool {
        let is_fresh = |s: &crate::app::ports::TemperatureSample| {
            now_ms.saturating_sub(s.taken_at_ms) <= self.stale_ms
        };

        let mut sample = env.latest_temperature().filter(|s| is_fresh(s));
        if sample.is_none() {
            env.refresh_temperature();
            sample = env.latest_temperature().filter(|s| is_fresh(s));
        }

        let was_locked = self.freeze_locked;
        match sample {
            None => {
                if !was_locked {
                    error!("SAFETY FREEZE LOCK: no usable temperature reading");
                }
                self.freeze_locked = true;
                self.last_temperature_c = None;
            }
            Some(s) => {
                self.last_temperature_c = Some(s.celsius);
                if s.celsius <= self.lock_c {
                    if !was_locked {
                        error!(
                            "SAFETY FREEZE LOCK: {:.1}°C <= {:.1}°C",
                            s.celsius, self.lock_c
                        );
                    }
                    self.freeze_locked = true;
                } else if was_locked && s.celsius >= self.clear_c {
                    info!(
                        "SAFETY FREEZE CLEARED: {:.1}°C >= {:.1}°C",
                        s.celsius, self.clear_c
                    );
                    self.freeze_locked = false;
                    self.last_freeze_alarm_ms = None;
                }
            }
        }

        if self.freeze_locked {
            let due = self
                .last_freeze_alarm_ms
                .is_none_or(|t| now_ms.saturating_sub(t) >= self.alarm_interval_ms);
            if due {
                self.last_freeze_alarm_ms = Some(now_ms);
                let value = self
                    .last_temperature_c
                    .map_or(NO_TEMPERATURE, |c| (c * 10.0).round() as i32);
                env.emit(&WateringEvent::Alarm {
                    kind: AlarmKind::Freeze,
                    channel: None,
                    value,
                });
            }
        }
        self.freeze_locked
    }

    pub const fn is_freeze_locked(&self) -> bool {
        self.freeze_locked
    }

    pub const fn last_temperature_c(&self) -> Option<f32> {
        self.last_temperature_c
    }

    // ── Veto ──────────────────────────────────────────────────────

    /// Decide whether a task for `channel` may be queued or started.
    ///
    /// Uses the cached freeze latch; call [`Self::evaluate_freeze`] first
    /// when a fresh reading is wanted.
    pub fn check(&self, channel: u8, trigger: Trigger, now_ms: u64) -> core::result::Result<(), SkipReason> {
        if self.freeze_locked {
            return Err(SkipReason::Freeze);
        }
        let overridden = trigger != Trigger::Scheduled && self.override_active(channel, now_ms);
        let blocks = |lock: &HydraulicLock| match lock.level {
            LockLevel::None => false,
            LockLevel::Soft => !overridden,
            LockLevel::Hard => true,
        };
        if blocks(&self.locks.global) {
            return Err(SkipReason::HydraulicLock);
        }
        if self
            .locks
            .channels
            .get(usize::from(channel))
            .is_some_and(|l| blocks(l))
        {
            return Err(SkipReason::HydraulicLock);
        }
        Ok(())
    }

    // ── Hydraulic locks ───────────────────────────────────────────

    pub fn lock(&self, scope: LockScope) -> Option<&HydraulicLock> {
        match scope {
            LockScope::Global => Some(&self.locks.global),
            LockScope::Channel(c) => self.locks.channels.get(usize::from(c)),
        }
    }

    fn lock_mut(&mut self, scope: LockScope) -> Result<&mut HydraulicLock> {
        match scope {
            LockScope::Global => Ok(&mut self.locks.global),
            LockScope::Channel(c) => self
                .locks
                .channels
                .get_mut(usize::from(c))
                .ok_or(WateringError::InvalidParam),
        }
    }

    pub fn set_lock(
        &mut self,
        scope: LockScope,
        level: LockLevel,
        reason: LockReason,
        now_ms: u64,
        retry_ms: u64,
    ) -> Result<()> {
        if level == LockLevel::None {
            return self.clear_lock(scope);
        }
        let lock = self.lock_mut(scope)?;
        *lock = HydraulicLock {
            level,
            reason,
            locked_at_ms: now_ms,
            retry_after_ms: if level == LockLevel::Soft {
                now_ms.saturating_add(retry_ms)
            } else {
                0
            },
        };
        warn!(
            "SAFETY LOCK SET: {:?} {:?} ({})",
            scope,
            level,
            reason.name()
        );
        Ok(())
    }

    pub fn clear_lock(&mut self, scope: LockScope) -> Result<()> {
        let lock = self.lock_mut(scope)?;
        if lock.is_locked() {
            info!("SAFETY LOCK CLEARED: {:?}", scope);
        }
        *lock = HydraulicLock::default();
        Ok(())
    }

    /// Lift every Soft lock whose retry time has passed.  Returns the
    /// scopes that were cleared.
    pub fn expire_soft_locks(&mut self, now_ms: u64) -> heapless::Vec<LockScope, { MAX_CHANNELS + 1 }> {
        let mut cleared = heapless::Vec::new();
        let expired = |l: &HydraulicLock| l.level == LockLevel::Soft && now_ms >= l.retry_after_ms;

        if expired(&self.locks.global) {
            self.locks.global = HydraulicLock::default();
            let _ = cleared.push(LockScope::Global);
        }
        for (i, l) in self.locks.channels.iter_mut().enumerate() {
            if expired(l) {
                *l = HydraulicLock::default();
                let _ = cleared.push(LockScope::Channel(i as u8));
            }
        }
        for scope in &cleared {
            info!("SAFETY LOCK EXPIRED: {:?}", scope);
        }
        cleared
    }

    pub fn any_lock(&self) -> bool {
        self.locks.global.is_locked() || self.locks.channels.iter().any(HydraulicLock::is_locked)
    }

    pub const fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// Install a persisted lock table.
    ///
    /// Timestamps in flash belong to a previous boot, so every lock is
    /// re-anchored at `now_ms`, keeping the remaining Soft window length.
    pub fn restore_locks(&mut self, mut table: LockTable, now_ms: u64) {
        let rebase = |l: &mut HydraulicLock| {
            if l.is_locked() {
                let window = l.retry_after_ms.saturating_sub(l.locked_at_ms);
                l.locked_at_ms = now_ms;
                if l.level == LockLevel::Soft {
                    l.retry_after_ms = now_ms.saturating_add(window);
                }
            }
        };
        rebase(&mut table.global);
        table.channels.iter_mut().for_each(rebase);
        self.locks = table;
    }

    // ── Manual override ───────────────────────────────────────────

    pub fn set_override(&mut self, channel: u8, duration_ms: u64, now_ms: u64) -> Result<()> {
        if usize::from(channel) >= MAX_CHANNELS || duration_ms == 0 {
            return Err(WateringError::InvalidParam);
        }
        self.manual_override = Some(ManualOverride {
            channel,
            expires_at_ms: now_ms.saturating_add(duration_ms),
        });
        info!("SAFETY OVERRIDE: channel {} for {} ms", channel, duration_ms);
        Ok(())
    }

    pub fn clear_override(&mut self) {
        self.manual_override = None;
    }

    pub fn override_active(&self, channel: u8, now_ms: u64) -> bool {
        self.manual_override
            .is_some_and(|o| o.channel == channel && now_ms < o.expires_at_ms)
    }
}
