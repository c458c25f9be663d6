//! Task queue and active-task lifecycle.
//!
//! A second `impl` block on [`WateringSystem`]: enqueue with validation and
//! safety gating, start the head of the queue, watch for completion,
//! pause / resume / stop.  Only one task runs at a time; it owns the single
//! open zone.

use log::{debug, error, info, warn};

use crate::app::events::{CompletionReport, StopReason, WateringEvent};
use crate::app::ports::Platform;
use crate::app::service::WateringSystem;
use crate::error::{Result, WateringError};
use crate::fsm::{SystemState, SystemStatus};
use crate::model::{MAX_CHANNELS, ProfileOutcome, SkipReason, Target, Task, Trigger};
use crate::safety::{LockLevel, LockReason, LockScope};

/// Runtime state of the task holding the open zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveTask {
    /// Task as it was queued (used for no-flow retries).
    pub task: Task,
    /// Target after rain reduction.
    pub target: Target,
    pub reduction_pct: f32,
    /// Monotonic start counter, lets late flow verdicts be discarded.
    pub seq: u32,
    pub started_at_ms: u64,
    pub paused: bool,
    pub pause_started_ms: u64,
    pub paused_total_ms: u64,
    /// Pulse count at which a volume task is done.
    pub target_pulses: u32,
    /// Last 10 % progress step reported.
    pub progress_step: u8,
}

impl ActiveTask {
    /// Watering time so far, excluding paused intervals (including the
    /// one in progress).
    pub fn effective_elapsed(&self, now_ms: u64) -> u64 {
        let paused = if self.paused {
            self.paused_total_ms + now_ms.saturating_sub(self.pause_started_ms)
        } else {
            self.paused_total_ms
        };
        now_ms.saturating_sub(self.started_at_ms).saturating_sub(paused)
    }
}

fn target_pulses(target: Target, pulses_per_liter: u32) -> u32 {
    match target {
        Target::Volume { liters } => (liters * pulses_per_liter as f32).ceil().max(1.0) as u32,
        Target::Duration { .. } => 0,
    }
}

impl<P: Platform> WateringSystem<P> {
    // ── Queue ─────────────────────────────────────────────────

    /// Validate, gate and append a task.
    ///
    /// Invalid parameters leave the queue untouched.  A safety or rain veto
    /// records the skip on the channel and returns `Busy`.
    pub fn enqueue(&mut self, task: Task) -> Result<()> {
        self.ensure_initialized()?;
        if usize::from(task.channel) >= MAX_CHANNELS {
            return Err(WateringError::InvalidParam);
        }
        task.target.validate(&self.config).map_err(|e| {
            warn!("enqueue: channel {} rejected: {e}", task.channel);
            WateringError::InvalidParam
        })?;
        if self.queue.is_full() {
            warn!("enqueue: queue full, channel {} dropped", task.channel);
            return Err(WateringError::QueueFull);
        }

        let now = self.platform.now_ms();
        self.safety.evaluate_freeze(&mut self.platform, now);
        if let Err(reason) = self.safety.check(task.channel, task.trigger, now) {
            self.record_skip(task.channel, reason);
            return Err(WateringError::Busy);
        }
        if !self.overrides(&task, now) && self.platform.impact(task.channel).skip {
            self.record_skip(task.channel, SkipReason::Rain);
            return Err(WateringError::Busy);
        }

        self.queue
            .push_back(task)
            .map_err(|_| WateringError::QueueFull)?;

        let expected = self.estimated_free_at(now);
        self.valves.notify_next_start(expected);

        let depth = self.queue.len() as u8;
        info!(
            "task queued: channel {} {:?} ({:?}), depth {}",
            task.channel, task.target, task.trigger, depth
        );
        self.platform.emit(&WateringEvent::TaskQueued {
            channel: task.channel,
            trigger: task.trigger,
            depth,
        });
        Ok(())
    }

    /// When the zone is expected to be free for the next task.
    fn estimated_free_at(&self, now: u64) -> u64 {
        let Some(active) = self.active.as_ref() else {
            return now;
        };
        match active.target {
            Target::Duration { minutes } => {
                let total = u64::from(minutes) * 60_000;
                now + total.saturating_sub(active.effective_elapsed(now))
            }
            // Unknown flow rate: assume the ceiling.
            Target::Volume { .. } => {
                now + self
                    .config
                    .max_task_ms()
                    .saturating_sub(active.effective_elapsed(now))
            }
        }
    }

    /// Direct commands under a manual override skip rain checks.
    fn overrides(&self, task: &Task, now: u64) -> bool {
        task.trigger != Trigger::Scheduled && self.safety.override_active(task.channel, now)
    }

    fn record_skip(&mut self, channel: u8, reason: SkipReason) {
        info!("task skipped: channel {} ({})", channel, reason.name());
        if let Some(ch) = self.channels.get_mut(usize::from(channel)) {
            ch.last_skip = Some(reason);
        }
        self.platform
            .emit(&WateringEvent::TaskSkipped { channel, reason });
    }

    /// Start the head of the queue if nothing is running.
    ///
    /// Returns `Ok(true)` when a task was started.  Nothing starts while a
    /// flow fault or a leak is latched.
    pub fn process_next(&mut self) -> Result<bool> {
        self.ensure_initialized()?;
        if self.active.is_some() || self.fsm.current() != SystemState::Idle {
            return Ok(false);
        }
        if self.leaking || self.flow_status == SystemStatus::Fault {
            return Ok(false);
        }
        let Some(task) = self.queue.pop_front() else {
            return Ok(false);
        };
        self.start_task(task)
    }

    fn start_task(&mut self, task: Task) -> Result<bool> {
        let now = self.platform.now_ms();
        self.safety.evaluate_freeze(&mut self.platform, now);
        if let Err(reason) = self.safety.check(task.channel, task.trigger, now) {
            self.record_skip(task.channel, reason);
            return Ok(false);
        }

        let rain = if self.overrides(&task, now) {
            Default::default()
        } else {
            self.platform.impact(task.channel)
        };
        if rain.skip {
            self.record_skip(task.channel, SkipReason::Rain);
            return Ok(false);
        }
        let target = task.target.reduced_by(rain.reduction_pct);
        if rain.reduction_pct > 0.0 {
            info!(
                "task start: channel {} reduced {:.0}% by rain: {:?} -> {:?}",
                task.channel, rain.reduction_pct, task.target, target
            );
        }

        self.platform.reset_pulses();
        if let Err(e) = self
            .valves
            .channel_on(&mut self.channels, task.channel, &mut self.platform)
        {
            error!("task start: channel {} valve failed: {e}", task.channel);
            return Err(e);
        }

        self.task_seq = self.task_seq.wrapping_add(1);
        let started_at_ms = self.platform.now_ms();
        self.active = Some(ActiveTask {
            task,
            target,
            reduction_pct: rain.reduction_pct,
            seq: self.task_seq,
            started_at_ms,
            paused: false,
            pause_started_ms: 0,
            paused_total_ms: 0,
            target_pulses: target_pulses(target, self.pulses_per_liter),
            progress_step: 0,
        });
        self.set_state(SystemState::Watering);
        info!(
            "task started: channel {} {:?} ({:?})",
            task.channel, target, task.trigger
        );
        self.platform.emit(&WateringEvent::TaskStarted {
            channel: task.channel,
            target,
            trigger: task.trigger,
        });
        Ok(true)
    }

    // ── Active task ───────────────────────────────────────────

    /// Completion check for the running task.  Returns the stop reason when
    /// the task ended during this call.
    pub fn check(&mut self) -> Option<StopReason> {
        let active = self.active?;
        if active.paused {
            return None;
        }
        let now = self.platform.now_ms();
        let elapsed = active.effective_elapsed(now);
        let pulses = self.platform.pulse_count();

        let done = match active.target {
            Target::Duration { minutes } => elapsed >= u64::from(minutes) * 60_000,
            Target::Volume { liters } => {
                let percent = (u64::from(pulses) * 100 / u64::from(active.target_pulses.max(1)))
                    .min(100) as u8;
                let step = percent / 10;
                if step > active.progress_step && step < 10 {
                    if let Some(a) = self.active.as_mut() {
                        a.progress_step = step;
                    }
                    self.platform.emit(&WateringEvent::TaskProgress {
                        channel: active.task.channel,
                        percent: step * 10,
                        liters: pulses as f32 / self.pulses_per_liter as f32,
                    });
                    debug!(
                        "task progress: channel {} {}% of {:.1} L",
                        active.task.channel,
                        step * 10,
                        liters
                    );
                }
                pulses >= active.target_pulses
            }
        };

        let reason = if done {
            StopReason::Completed
        } else if elapsed >= self.config.max_task_ms() {
            warn!(
                "task ceiling: channel {} stopped after {} ms",
                active.task.channel, elapsed
            );
            StopReason::TimeLimit
        } else {
            return None;
        };
        self.finish_active(reason);
        Some(reason)
    }

    /// Stop the running task.  Returns `false` when nothing was running.
    pub fn stop(&mut self, reason: StopReason) -> bool {
        if self.active.is_none() {
            return false;
        }
        self.finish_active(reason);
        true
    }

    pub fn stop_current(&mut self) -> bool {
        self.stop(StopReason::Manual)
    }

    /// De-energise the zone but keep the task.  Returns `false` when there
    /// is no running task or it is already paused.
    pub fn pause_current(&mut self) -> bool {
        let Some(active) = self.active else {
            return false;
        };
        if active.paused {
            return false;
        }
        let channel = active.task.channel;
        if let Err(e) = self.valves.suspend_output(channel, &mut self.platform) {
            error!("pause: channel {} valve close failed: {e}", channel);
        }
        let now = self.platform.now_ms();
        if let Some(a) = self.active.as_mut() {
            a.paused = true;
            a.pause_started_ms = now;
        }
        self.set_state(SystemState::Paused);
        info!("task paused: channel {}", channel);
        self.platform.emit(&WateringEvent::TaskPaused { channel });
        true
    }

    /// Re-open the zone of a paused task.  Pause time is excluded from the
    /// elapsed time.
    pub fn resume_current(&mut self) -> bool {
        let Some(active) = self.active else {
            return false;
        };
        if !active.paused {
            return false;
        }
        let channel = active.task.channel;
        if let Err(e) = self.valves.resume_output(channel, &mut self.platform) {
            error!("resume: channel {} valve open failed: {e}", channel);
            return false;
        }
        let now = self.platform.now_ms();
        if let Some(a) = self.active.as_mut() {
            a.paused_total_ms += now.saturating_sub(a.pause_started_ms);
            a.paused = false;
        }
        self.set_state(SystemState::Watering);
        info!("task resumed: channel {}", channel);
        self.platform.emit(&WateringEvent::TaskResumed { channel });
        true
    }

    fn finish_active(&mut self, reason: StopReason) {
        let Some(active) = self.active.take() else {
            return;
        };
        let channel = active.task.channel;
        let now = self.platform.now_ms();
        let elapsed_ms = active.effective_elapsed(now);
        let pulses = self.platform.pulse_count();
        let volume_liters = pulses as f32 / self.pulses_per_liter as f32;

        if usize::from(channel) >= MAX_CHANNELS {
            error!("task stop: channel {} out of range, closing everything", channel);
            if let Err(e) = self.valves.close_all(&mut self.channels, &mut self.platform) {
                error!("task stop: close-all failed: {e}");
            }
            self.set_state(SystemState::Idle);
            return;
        }

        if !self.queue.is_empty() {
            self.valves.notify_next_start(now);
        }
        if let Err(e) = self
            .valves
            .channel_off(&mut self.channels, channel, &mut self.platform)
        {
            error!("task stop: channel {} valve close failed: {e}", channel);
        }

        let ch = &mut self.channels[usize::from(channel)];
        ch.last_watering_ms = Some(now);
        ch.completed_tasks = ch.completed_tasks.saturating_add(1);
        self.completed_total = self.completed_total.saturating_add(1);

        if reason == StopReason::Completed {
            self.learn_profile(channel, volume_liters, elapsed_ms);
        }

        if self.fsm.current() != SystemState::ErrorRecovery {
            self.set_state(SystemState::Idle);
        }
        info!(
            "task finished: channel {} ({}), {} ms, {:.2} L",
            channel,
            reason.name(),
            elapsed_ms,
            volume_liters
        );
        self.platform
            .emit(&WateringEvent::TaskCompleted(CompletionReport {
                channel,
                trigger: active.task.trigger,
                target: active.target,
                elapsed_ms,
                pulses,
                volume_liters,
                reason,
            }));
    }

    fn learn_profile(&mut self, channel: u8, liters: f32, elapsed_ms: u64) {
        if elapsed_ms == 0 {
            return;
        }
        let ml_min = liters * 1_000.0 * 60_000.0 / elapsed_ms as f32;
        let idx = usize::from(channel);
        match self.channels[idx].profile.record_run(ml_min) {
            ProfileOutcome::StillLearning | ProfileOutcome::Normal => {}
            ProfileOutcome::Calibrated { nominal_ml_min } => {
                info!(
                    "profile: channel {} calibrated at {:.0} ml/min",
                    channel, nominal_ml_min
                );
                if let Err(e) = self.persist_channel(idx) {
                    warn!("profile: channel {} not persisted: {e}", channel);
                }
            }
            ProfileOutcome::HighFlow { measured_ml_min } => {
                warn!(
                    "profile: channel {} high flow {:.0} ml/min (nominal {:.0})",
                    channel, measured_ml_min, self.channels[idx].profile.nominal_ml_min
                );
                if let Err(e) = self.set_hydraulic_lock(
                    LockScope::Channel(channel),
                    LockLevel::Soft,
                    LockReason::HighFlow,
                ) {
                    error!("profile: lock for channel {} failed: {e}", channel);
                }
            }
        }
    }

    /// Queue a manual task for `channel` (button / local UI).
    pub fn water_now(&mut self, channel: u8, minutes: u16) -> Result<()> {
        self.enqueue(Task::duration(channel, minutes, Trigger::Manual))
    }
}
