//! Watering system — the hexagonal core.
//!
//! [`WateringSystem`] owns every piece of engine state: the channel table,
//! the task queue and active-task slot, the state machine, the valve
//! coordinator and the safety gate.  It is constructed once and driven by
//! three periodic activities (task loop, scheduler, flow check).  All I/O
//! flows through the [`Platform`] it owns, so the whole engine runs
//! against mock adapters in tests.
//!
//! ```text
//!  Scheduler ──┐                         ┌──▶ ValvePort
//!  Commands  ──┼──▶ ┌─────────────────┐ ──┼──▶ EventSink
//!              │    │ WateringSystem  │   │
//!  FlowMonitor ┘    │ queue · FSM ·   │ ◀─┼─── FlowSensorPort / ClockPort
//!   (verdicts)      │ valves · safety │ ◀─┴─── Environment / Demand / Rain
//!                   └─────────────────┘
//! ```
//!
//! Task lifecycle operations live in [`crate::task_manager`].

use heapless::Deque;
use log::{debug, error, info, warn};

use crate::clock::WallClock;
use crate::config::SystemConfig;
use crate::error::{Result, WateringError};
use crate::flow_monitor::{ActiveFlowView, FlowMonitor, FlowSnapshot, FlowVerdict};
use crate::fsm::{StateMachine, SystemState, SystemStatus};
use crate::model::{
    CHANNEL_NAME_LEN, Channel, GeoLocation, MAX_CHANNELS, QUEUE_CAPACITY, Schedule, ScheduleKind,
    Target, Task,
};
use crate::persistence::{self, ChannelRecord};
use crate::power::PowerMode;
use crate::safety::{LockLevel, LockReason, LockScope, LockTable, SafetyGate};
use crate::scheduler::{Backpressure, ChannelPlan, Scheduler, SchedulerDelegate};
use crate::task_manager::ActiveTask;
use crate::valves::ValveCoordinator;

use super::events::{AlarmKind, StopReason, WateringEvent};
use super::ports::{DemandDecision, Platform};

// ───────────────────────────────────────────────────────────────
// Status report
// ───────────────────────────────────────────────────────────────

/// Progress of the running task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveReport {
    pub channel: u8,
    pub target: Target,
    pub elapsed_ms: u64,
    pub pulses: u32,
    pub volume_liters: f32,
    pub paused: bool,
}

/// Snapshot returned by `get_status`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusReport {
    pub status: SystemStatus,
    pub state: SystemState,
    pub queue_depth: usize,
    pub active: Option<ActiveReport>,
    pub freeze_lockout: bool,
    pub temperature_c: Option<f32>,
    pub power_mode: PowerMode,
    pub completed_tasks: u32,
    pub master_open: bool,
}

// ───────────────────────────────────────────────────────────────
// WateringSystem
// ───────────────────────────────────────────────────────────────

pub struct WateringSystem<P: Platform> {
    pub(crate) platform: P,
    pub(crate) config: SystemConfig,
    pub(crate) channels: [Channel; MAX_CHANNELS],
    pub(crate) queue: Deque<Task, QUEUE_CAPACITY>,
    pub(crate) active: Option<ActiveTask>,
    pub(crate) fsm: StateMachine,
    /// Latched flow-fault status: `Ok`, `NoFlow` or `Fault`.
    pub(crate) flow_status: SystemStatus,
    /// Unexpected-flow alarm latched.  Independent of `flow_status` so a
    /// leak during a fault does not erase the fault.
    pub(crate) leaking: bool,
    /// Last published effective status.
    status: SystemStatus,
    pub(crate) valves: ValveCoordinator,
    pub(crate) safety: SafetyGate,
    scheduler: Scheduler,
    wall_clock: WallClock,
    pub(crate) pulses_per_liter: u32,
    pub(crate) completed_total: u32,
    pub(crate) task_seq: u32,
    pub(crate) initialized: bool,
}

impl<P: Platform> WateringSystem<P> {
    /// Construct the engine.  Rejects an invalid configuration.
    ///
    /// Does **not** touch hardware or storage; call [`Self::init`] next.
    pub fn new(platform: P, config: SystemConfig) -> Result<Self> {
        config.validate().map_err(|e| {
            error!("WateringSystem: {e}");
            WateringError::from(e)
        })?;
        Ok(Self {
            valves: ValveCoordinator::new(&config),
            safety: SafetyGate::new(&config),
            wall_clock: WallClock::new(config.rtc_failure_threshold),
            pulses_per_liter: config.default_pulses_per_liter,
            platform,
            channels: core::array::from_fn(|i| Channel::new(i as u8)),
            queue: Deque::new(),
            active: None,
            fsm: StateMachine::new(),
            flow_status: SystemStatus::Ok,
            leaking: false,
            status: SystemStatus::Ok,
            scheduler: Scheduler::new(),
            completed_total: 0,
            task_seq: 0,
            initialized: false,
            config,
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Restore persisted channel records, locks and calibration, then
    /// drive every valve closed.
    ///
    /// Unreadable records fall back to defaults; only a failure to reach
    /// a safe valve state is returned.
    pub fn init(&mut self) -> Result<()> {
        let now = self.platform.now_ms();

        for ch in &mut self.channels {
            let key = persistence::schedule_key(ch.id);
            match persistence::load::<ChannelRecord>(&self.platform, &key) {
                Ok(Some(rec)) => {
                    if rec.schedule.validate(&self.config).is_ok() {
                        rec.apply_to(ch);
                    } else {
                        warn!("init: stored schedule for channel {} invalid, using default", ch.id);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("init: channel {} record unreadable ({e}), using default", ch.id),
            }
        }

        match persistence::load::<u32>(&self.platform, persistence::KEY_CALIBRATION) {
            Ok(Some(ppl)) if ppl > 0 => self.pulses_per_liter = ppl,
            Ok(_) => {}
            Err(e) => warn!("init: flow calibration unreadable ({e}), using default"),
        }

        match persistence::load::<LockTable>(&self.platform, persistence::KEY_LOCKS) {
            Ok(Some(table)) => self.safety.restore_locks(table, now),
            Ok(None) => {}
            Err(e) => warn!("init: lock table unreadable ({e}), starting unlocked"),
        }

        let closed = self.valves.close_all(&mut self.channels, &mut self.platform);
        self.initialized = true;
        self.refresh_status();
        info!(
            "WateringSystem initialised: {} channels, {} pulses/L, locks={}",
            MAX_CHANNELS,
            self.pulses_per_liter,
            self.safety.any_lock()
        );
        closed
    }

    pub(crate) fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(WateringError::NotInitialized)
        }
    }

    // ── Periodic drivers ──────────────────────────────────────

    /// One pass of the task-processing loop: deferred master closes, lock
    /// expiry, completion check, then start the next queued task.
    pub fn tick(&mut self) {
        if !self.initialized {
            return;
        }
        let now = self.platform.now_ms();

        if let Err(e) = self.valves.poll(&mut self.platform) {
            warn!("tick: deferred master close failed: {e}");
        }

        let expired = self.safety.expire_soft_locks(now);
        if !expired.is_empty() {
            for scope in &expired {
                self.platform.emit(&WateringEvent::LockChanged {
                    channel: scope.channel(),
                    level: LockLevel::None,
                    reason: LockReason::None,
                });
            }
            self.persist_locks();
        }

        self.safety.evaluate_freeze(&mut self.platform, now);
        self.check();

        match self.process_next() {
            Ok(_) => {}
            Err(e) => warn!("tick: next task not started: {e}"),
        }
        self.refresh_status();
    }

    /// One scheduler pass.  Returns the number of tasks queued.
    pub fn run_scheduler(&mut self) -> usize {
        if !self.initialized {
            return 0;
        }
        let local = self.wall_clock.now_local(&mut self.platform);
        let now = self.platform.now_ms();
        self.safety.evaluate_freeze(&mut self.platform, now);
        self.refresh_status();
        self.anchor_periodic_schedules(local.day_ordinal());

        let plans: [ChannelPlan; MAX_CHANNELS] = core::array::from_fn(|i| ChannelPlan {
            channel: self.channels[i].id,
            schedule: self.channels[i].schedule,
            location: self.channels[i].location,
            anchor_day: self.channels[i].periodic_anchor_day,
        });
        let backpressure = Backpressure {
            fault: self.flow_status == SystemStatus::Fault,
            freeze_lockout: self.safety.is_freeze_locked(),
            max_queue_depth: usize::from(self.config.scheduler_backpressure_depth),
        };
        let window = self.config.power_mode.schedule_window_min();

        let mut scheduler = core::mem::take(&mut self.scheduler);
        let fired = scheduler.tick(&local, &plans, backpressure, window, self);
        self.scheduler = scheduler;
        fired
    }

    /// Periodic schedules count from the first day the scheduler sees them.
    fn anchor_periodic_schedules(&mut self, today: u32) {
        for idx in 0..self.channels.len() {
            let ch = &mut self.channels[idx];
            if !matches!(ch.schedule.kind, ScheduleKind::Periodic { .. })
                || ch.periodic_anchor_day.is_some()
            {
                continue;
            }
            ch.periodic_anchor_day = Some(today);
            info!("channel {} interval anchored at day {}", ch.id, today);
            if let Err(e) = self.persist_channel(idx) {
                warn!("scheduler: anchor for channel {idx} not saved: {e}");
            }
        }
    }

    /// Single-threaded flow check: snapshot, evaluate, apply.
    pub fn check_flow(&mut self, monitor: &mut FlowMonitor) -> Option<FlowVerdict> {
        let snap = self.flow_snapshot();
        let verdict = monitor.evaluate(&snap)?;
        self.apply_flow_verdict(verdict);
        Some(verdict)
    }

    // ── Flow monitor seam ─────────────────────────────────────

    pub fn flow_snapshot(&self) -> FlowSnapshot {
        let now_ms = self.platform.now_ms();
        FlowSnapshot {
            now_ms,
            pulses: self.platform.pulse_count(),
            active: self.active.as_ref().map(|a| ActiveFlowView {
                seq: a.seq,
                task: a.task,
                effective_elapsed_ms: a.effective_elapsed(now_ms),
                paused: a.paused,
            }),
            status: self.flow_status,
            leaking: self.leaking,
        }
    }

    pub fn apply_flow_verdict(&mut self, verdict: FlowVerdict) {
        match verdict {
            FlowVerdict::NoFlow {
                seq,
                task,
                attempt,
                retry,
            } => {
                if self.active.as_ref().map(|a| a.seq) != Some(seq) {
                    debug!("flow: stale no-flow verdict for task {} ignored", seq);
                    return;
                }
                self.platform.emit(&WateringEvent::Alarm {
                    kind: AlarmKind::NoFlow,
                    channel: Some(task.channel),
                    value: i32::from(attempt),
                });
                self.stop(StopReason::NoFlow);

                if retry {
                    if self.queue.push_front(task).is_ok() {
                        warn!(
                            "flow: retrying channel {} (attempt {})",
                            task.channel, attempt
                        );
                        let now = self.platform.now_ms();
                        self.valves.notify_next_start(now);
                        self.platform.emit(&WateringEvent::TaskQueued {
                            channel: task.channel,
                            trigger: task.trigger,
                            depth: self.queue.len() as u8,
                        });
                        self.set_flow_status(SystemStatus::NoFlow);
                        return;
                    }
                    error!("flow: retry for channel {} could not be queued", task.channel);
                }
                self.escalate_fault();
            }
            FlowVerdict::FlowRestored => {
                if self.flow_status == SystemStatus::NoFlow {
                    info!("flow: restored");
                    self.set_flow_status(SystemStatus::Ok);
                }
            }
            FlowVerdict::UnexpectedFlow { pulses } => {
                if self.active.is_some() {
                    debug!("flow: unexpected-flow verdict raced a task start, ignored");
                    return;
                }
                self.platform.emit(&WateringEvent::Alarm {
                    kind: AlarmKind::UnexpectedFlow,
                    channel: None,
                    value: pulses as i32,
                });
                if let Err(e) = self.valves.close_all(&mut self.channels, &mut self.platform) {
                    error!("flow: close-all after leak failed: {e}");
                }
                self.leaking = true;
                self.refresh_status();
            }
            FlowVerdict::UnexpectedFlowPersists { .. } => self.platform.reset_pulses(),
            FlowVerdict::UnexpectedFlowCleared => {
                if self.leaking {
                    self.leaking = false;
                    self.refresh_status();
                }
            }
        }
    }

    fn escalate_fault(&mut self) {
        error!("SAFETY FAULT SET: flow retries exhausted, manual reset required");
        self.platform.emit(&WateringEvent::Alarm {
            kind: AlarmKind::Generic,
            channel: None,
            value: 0,
        });
        self.set_state(SystemState::ErrorRecovery);
        self.set_flow_status(SystemStatus::Fault);
    }

    // ── Status / state ────────────────────────────────────────

    pub(crate) fn set_state(&mut self, next: SystemState) {
        let now = self.platform.now_ms();
        if let Some((from, to)) = self.fsm.transition(next, now) {
            self.platform.emit(&WateringEvent::StateChanged { from, to });
        }
    }

    pub(crate) fn set_flow_status(&mut self, status: SystemStatus) {
        self.flow_status = status;
        self.refresh_status();
    }

    /// Recompute the effective status and publish a change.
    pub(crate) fn refresh_status(&mut self) {
        let next = match self.flow_status {
            _ if self.leaking => SystemStatus::UnexpectedFlow,
            SystemStatus::Fault => SystemStatus::Fault,
            _ if self.safety.is_freeze_locked() => SystemStatus::FreezeLockout,
            SystemStatus::NoFlow => SystemStatus::NoFlow,
            _ if self
                .safety
                .lock(LockScope::Global)
                .is_some_and(|l| l.is_locked()) =>
            {
                SystemStatus::Locked
            }
            _ if self.wall_clock.is_degraded() => SystemStatus::RtcError,
            _ if self.config.power_mode == PowerMode::UltraLowPower => SystemStatus::LowPower,
            _ => SystemStatus::Ok,
        };
        if next != self.status {
            info!("status: {} -> {}", self.status.name(), next.name());
            self.platform.emit(&WateringEvent::StatusChanged {
                from: self.status,
                to: next,
            });
            self.status = next;
        }
    }

    /// Leave Fault / NoFlow / UnexpectedFlow and ErrorRecovery.
    ///
    /// Returns `false` when nothing was faulted.  The flow monitor's
    /// attempt counter is reset by the caller that owns it.
    pub fn clear_errors(&mut self) -> bool {
        let faulted = self.leaking
            || self.flow_status.is_flow_fault()
            || self.fsm.current() == SystemState::ErrorRecovery;
        if !faulted {
            return false;
        }
        info!("SAFETY FAULT CLEARED: manual reset from {}", self.flow_status.name());
        if self.fsm.current() == SystemState::ErrorRecovery {
            self.set_state(SystemState::Idle);
        }
        self.leaking = false;
        self.set_flow_status(SystemStatus::Ok);
        true
    }

    pub fn set_power_mode(&mut self, mode: PowerMode) {
        if self.config.power_mode != mode {
            info!("power mode: {} -> {}", self.config.power_mode.name(), mode.name());
            self.config.power_mode = mode;
        }
        self.refresh_status();
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn status(&self) -> SystemStatus {
        self.status
    }

    pub fn state(&self) -> SystemState {
        self.fsm.current()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn queued_tasks(&self) -> impl Iterator<Item = &Task> {
        self.queue.iter()
    }

    pub fn active_task(&self) -> Option<&ActiveTask> {
        self.active.as_ref()
    }

    pub fn channel(&self, id: u8) -> Option<&Channel> {
        self.channels.get(usize::from(id))
    }

    pub fn channels(&self) -> &[Channel; MAX_CHANNELS] {
        &self.channels
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn power_mode(&self) -> PowerMode {
        self.config.power_mode
    }

    pub fn valves(&self) -> &ValveCoordinator {
        &self.valves
    }

    pub fn safety(&self) -> &SafetyGate {
        &self.safety
    }

    pub fn completed_tasks(&self) -> u32 {
        self.completed_total
    }

    pub fn flow_calibration(&self) -> u32 {
        self.pulses_per_liter
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn get_status(&self) -> StatusReport {
        let now = self.platform.now_ms();
        let pulses = self.platform.pulse_count();
        StatusReport {
            status: self.status,
            state: self.fsm.current(),
            queue_depth: self.queue.len(),
            active: self.active.as_ref().map(|a| ActiveReport {
                channel: a.task.channel,
                target: a.target,
                elapsed_ms: a.effective_elapsed(now),
                pulses,
                volume_liters: pulses as f32 / self.pulses_per_liter as f32,
                paused: a.paused,
            }),
            freeze_lockout: self.safety.is_freeze_locked(),
            temperature_c: self.safety.last_temperature_c(),
            power_mode: self.config.power_mode,
            completed_tasks: self.completed_total,
            master_open: self.valves.is_master_open(),
        }
    }

    // ── Configuration writes ──────────────────────────────────

    /// Validate, persist and apply a new system configuration.
    pub fn update_config(&mut self, config: SystemConfig) -> Result<()> {
        config.validate()?;
        persistence::save(&mut self.platform, persistence::KEY_CONFIG, &config)?;
        self.valves.reconfigure(&config);
        self.safety.reconfigure(&config);
        self.config = config;
        info!("configuration updated");
        self.refresh_status();
        Ok(())
    }

    pub fn set_flow_calibration(&mut self, pulses_per_liter: u32) -> Result<()> {
        if pulses_per_liter == 0 {
            return Err(WateringError::InvalidParam);
        }
        persistence::save(&mut self.platform, persistence::KEY_CALIBRATION, &pulses_per_liter)?;
        self.pulses_per_liter = pulses_per_liter;
        info!("flow calibration set to {} pulses/L", pulses_per_liter);
        Ok(())
    }

    pub fn update_schedule(&mut self, channel: u8, schedule: Schedule) -> Result<()> {
        let idx = self.channel_index(channel)?;
        schedule.validate(&self.config)?;
        self.channels[idx].schedule = schedule;
        self.channels[idx].periodic_anchor_day = None;
        self.scheduler.reset_channel(channel);
        info!("channel {} schedule updated ({:?})", channel, schedule.kind);
        self.persist_channel(idx)
    }

    pub fn set_channel_name(&mut self, channel: u8, name: &str) -> Result<()> {
        let idx = self.channel_index(channel)?;
        let mut buf = heapless::String::<CHANNEL_NAME_LEN>::new();
        buf.push_str(name).map_err(|()| WateringError::InvalidParam)?;
        self.channels[idx].name = buf;
        self.persist_channel(idx)
    }

    pub fn set_channel_location(&mut self, channel: u8, location: Option<GeoLocation>) -> Result<()> {
        let idx = self.channel_index(channel)?;
        if location.is_some_and(|l| {
            !(-90.0..=90.0).contains(&l.latitude) || !(-180.0..=180.0).contains(&l.longitude)
        }) {
            return Err(WateringError::InvalidParam);
        }
        self.channels[idx].location = location;
        self.persist_channel(idx)
    }

    // ── Hydraulic locks / override ────────────────────────────

    pub fn set_hydraulic_lock(
        &mut self,
        scope: LockScope,
        level: LockLevel,
        reason: LockReason,
    ) -> Result<()> {
        let now = self.platform.now_ms();
        let retry = u64::from(self.config.soft_lock_retry_ms);
        self.safety.set_lock(scope, level, reason, now, retry)?;
        self.platform.emit(&WateringEvent::LockChanged {
            channel: scope.channel(),
            level,
            reason,
        });
        self.persist_locks();
        self.refresh_status();
        Ok(())
    }

    pub fn clear_hydraulic_lock(&mut self, scope: LockScope) -> Result<()> {
        self.set_hydraulic_lock(scope, LockLevel::None, LockReason::None)
    }

    pub fn set_manual_override(&mut self, channel: u8, duration_ms: u64) -> Result<()> {
        let now = self.platform.now_ms();
        self.safety.set_override(channel, duration_ms, now)
    }

    pub fn clear_manual_override(&mut self) {
        self.safety.clear_override();
    }

    // ── Valves ────────────────────────────────────────────────

    /// Stop any task and force every valve closed.
    pub fn close_all(&mut self) -> Result<()> {
        if self.active.is_some() {
            self.stop(StopReason::Safety);
        }
        self.valves.close_all(&mut self.channels, &mut self.platform)
    }

    pub fn open_master_manual(&mut self) -> Result<()> {
        self.valves.open_master_manual(&mut self.platform)
    }

    pub fn close_master_manual(&mut self) -> Result<()> {
        self.valves.close_master_manual(&mut self.platform)
    }

    /// Record that a task is expected to start at `expected_start_ms`
    /// (for example from an external interval controller).
    pub fn notify_expected_start(&mut self, expected_start_ms: u64) {
        self.valves.notify_next_start(expected_start_ms);
    }

    // ── Internal ──────────────────────────────────────────────

    pub(crate) fn channel_index(&self, channel: u8) -> Result<usize> {
        let idx = usize::from(channel);
        if idx < MAX_CHANNELS {
            Ok(idx)
        } else {
            Err(WateringError::InvalidParam)
        }
    }

    pub(crate) fn persist_channel(&mut self, idx: usize) -> Result<()> {
        let record = ChannelRecord::from(&self.channels[idx]);
        let key = persistence::schedule_key(self.channels[idx].id);
        persistence::save(&mut self.platform, &key, &record)
    }

    pub(crate) fn persist_locks(&mut self) {
        let table = *self.safety.locks();
        if let Err(e) = persistence::save(&mut self.platform, persistence::KEY_LOCKS, &table) {
            warn!("lock table not persisted: {e}");
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Scheduler delegate
// ───────────────────────────────────────────────────────────────

impl<P: Platform> SchedulerDelegate for WateringSystem<P> {
    fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    fn on_schedule_fired(&mut self, mut task: Task) -> Result<()> {
        if let Target::Volume { liters } = task.target {
            if liters > self.config.max_volume_l {
                warn!(
                    "scheduler: channel {} demand {:.1} L capped at {:.1} L",
                    task.channel, liters, self.config.max_volume_l
                );
                task.target = Target::Volume {
                    liters: self.config.max_volume_l,
                };
            }
        }
        self.enqueue(task)
    }

    fn irrigation_demand(&mut self, channel: u8, missed_days: u32) -> Result<DemandDecision> {
        if missed_days > 0 {
            self.platform.apply_missed_days(channel, missed_days)?;
        }
        self.platform.decide(channel)
    }
}
