//! Thread-shared handle over the watering system.
//!
//! The task loop, the scheduler thread, the flow-check timer and command
//! handlers all reach the engine through [`SharedSystem`].  Periodic work
//! uses `try_with` and skips a cycle when the state is busy; commands wait
//! at most `command_lock_timeout_ms` and then report `Busy`.
//!
//! Lock order is flat: the engine lock and the flow-monitor lock are never
//! held together.

use core::sync::atomic::{AtomicU32, Ordering};

use log::{debug, info, warn};

use crate::config::SystemConfig;
use crate::error::{Result, WateringError};
use crate::flow_monitor::{FlowMonitor, FlowVerdict};
use crate::lock::StateLock;
use crate::power::PowerMode;
use crate::sensors::flow::FlowNotifier;

use super::commands::{Command, CommandOutcome};
use super::events::WateringEvent;
use super::ports::{ClockPort, EventSink, FlowSensorPort, Platform};
use super::service::{StatusReport, WateringSystem};

pub struct SharedSystem<P: Platform> {
    system: StateLock<WateringSystem<P>>,
    monitor: StateLock<FlowMonitor>,
    /// Follows `command_lock_timeout_ms` across config updates.
    timeout_ms: AtomicU32,
}

impl<P: Platform> SharedSystem<P> {
    pub fn new(system: WateringSystem<P>) -> Self {
        let monitor = FlowMonitor::new(system.config());
        let timeout_ms = system.config().command_lock_timeout_ms;
        Self {
            system: StateLock::new(system),
            monitor: StateLock::new(monitor),
            timeout_ms: AtomicU32::new(timeout_ms),
        }
    }

    fn timeout_ms(&self) -> u32 {
        self.timeout_ms.load(Ordering::Relaxed)
    }

    /// Run `f` under the engine lock with the command timeout.
    pub fn with_system<R>(&self, f: impl FnOnce(&mut WateringSystem<P>) -> R) -> Result<R> {
        self.system.with_timeout(self.timeout_ms(), f).map_err(|e| {
            warn!("command rejected: engine busy ({e})");
            WateringError::Busy
        })
    }

    pub fn handle_command(&self, cmd: Command) -> Result<CommandOutcome> {
        match cmd {
            Command::ClearErrors => self.clear_errors().map(CommandOutcome::Applied),
            Command::UpdateConfig(config) => {
                self.update_config(config).map(|()| CommandOutcome::Done)
            }
            cmd => self.with_system(|s| s.handle_command(cmd))?,
        }
    }

    // ── Periodic work ─────────────────────────────────────────

    /// One task-loop pass.  Returns `false` if skipped because the state
    /// was busy.
    pub fn tick(&self) -> bool {
        let ran = self.system.try_with(WateringSystem::tick).is_some();
        if !ran {
            debug!("task loop: state busy, cycle skipped");
        }
        ran
    }

    pub fn run_scheduler(&self) -> Option<usize> {
        let fired = self.system.try_with(WateringSystem::run_scheduler);
        if fired.is_none() {
            debug!("scheduler: state busy, pass skipped");
        }
        fired
    }

    /// Snapshot under the engine lock, evaluate under the monitor lock,
    /// apply under the engine lock again.
    pub fn run_flow_check(&self) -> Option<FlowVerdict> {
        let snap = self.system.try_with(|s| s.flow_snapshot())?;
        let verdict = self.monitor.try_with(|m| m.evaluate(&snap))??;
        match self
            .system
            .with_timeout(self.timeout_ms(), |s| s.apply_flow_verdict(verdict))
        {
            Ok(()) => Some(verdict),
            Err(e) => {
                warn!("flow check: verdict {:?} dropped ({e})", verdict);
                None
            }
        }
    }

    /// Forward a pending flow-sensor notification as a `FlowUpdate` event.
    pub fn notify_flow(&self, notifier: &mut FlowNotifier<'_>) -> bool {
        self.system
            .try_with(|s| {
                let now = s.platform().now_ms();
                if !notifier.poll(now) {
                    return false;
                }
                let pulses = s.platform().pulse_count();
                s.platform_mut().emit(&WateringEvent::FlowUpdate { pulses });
                true
            })
            .unwrap_or(false)
    }

    pub fn task_loop_interval_ms(&self) -> u32 {
        self.system
            .try_with(|s| s.power_mode())
            .unwrap_or_default()
            .task_loop_interval_ms()
    }

    pub fn scheduler_interval_ms(&self) -> u32 {
        self.system
            .try_with(|s| s.power_mode())
            .unwrap_or_default()
            .scheduler_interval_ms()
    }

    // ── Commands ──────────────────────────────────────────────

    pub fn clear_errors(&self) -> Result<bool> {
        let cleared = self.with_system(WateringSystem::clear_errors)?;
        self.monitor
            .with_timeout(self.timeout_ms(), FlowMonitor::reset)
            .map_err(|_| WateringError::Busy)?;
        Ok(cleared)
    }

    /// Apply a new configuration to the engine, then hand the flow
    /// thresholds and the command timeout to the shared side.
    pub fn update_config(&self, config: SystemConfig) -> Result<()> {
        self.with_system(|s| s.update_config(config.clone()))??;
        self.timeout_ms
            .store(config.command_lock_timeout_ms, Ordering::Relaxed);
        self.monitor
            .with_timeout(self.timeout_ms(), |m| m.reconfigure(&config))
            .map_err(|_| WateringError::Busy)?;
        info!(
            "shared: config applied (lock timeout {} ms)",
            config.command_lock_timeout_ms
        );
        Ok(())
    }

    pub fn stop_current(&self) -> Result<bool> {
        self.with_system(WateringSystem::stop_current)
    }

    pub fn pause_current(&self) -> Result<bool> {
        self.with_system(WateringSystem::pause_current)
    }

    pub fn resume_current(&self) -> Result<bool> {
        self.with_system(WateringSystem::resume_current)
    }

    pub fn set_power_mode(&self, mode: PowerMode) -> Result<()> {
        self.with_system(|s| s.set_power_mode(mode))
    }

    pub fn get_status(&self) -> Result<StatusReport> {
        self.with_system(|s| s.get_status())
    }

    pub fn queue_depth(&self) -> Result<usize> {
        self.with_system(|s| s.queue_depth())
    }

    pub fn into_inner(self) -> WateringSystem<P> {
        self.system.into_inner()
    }
}
