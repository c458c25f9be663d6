//! Per-channel watering scheduler.
//!
//! Runs on its own cadence (60 s / 120 s / 300 s by power mode) and turns
//! channel schedules into tasks.  Like every other trigger source it does
//! not touch the queue directly: fires go through a [`SchedulerDelegate`],
//! which the watering system implements.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Scheduler::tick(local time, channel plans, backpressure)   │
//! │                                                             │
//! │   Daily ───┐                                                │
//! │   Periodic ├──▶ time-of-day window + per-day dedupe ──┐     │
//! │   Auto ────┘──▶ demand decision once per day ─────────┤     │
//! │                                                       ▼     │
//! │                        SchedulerDelegate::on_schedule_fired │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A schedule matches while local time lies in `[start, start + window)`,
//! where the window equals the scheduler cadence in minutes, so every
//! start is seen by exactly one pass.  Days are compared as continuous
//! ordinals, which keeps dedupe correct across leap-year boundaries.

use log::{debug, info, warn};

use crate::app::ports::DemandDecision;
use crate::error::Result;
use crate::model::{
    GeoLocation, LocalTime, MAX_CHANNELS, Schedule, ScheduleKind, Task, Trigger, weekday_bit,
};
use crate::solar;

const MINUTES_PER_DAY: u16 = 24 * 60;

/// Callback surface the scheduler drives.
pub trait SchedulerDelegate {
    /// Tasks currently waiting in the queue.
    fn queue_depth(&self) -> usize;

    /// A schedule fired; queue `task`.
    fn on_schedule_fired(&mut self, task: Task) -> Result<()>;

    /// Ask the irrigation-demand engine about `channel`, first catching
    /// up `missed_days` days the scheduler did not observe.
    fn irrigation_demand(&mut self, channel: u8, missed_days: u32) -> Result<DemandDecision>;
}

/// Schedule inputs for one channel, copied out of the channel table.
#[derive(Debug, Clone, Copy)]
pub struct ChannelPlan {
    pub channel: u8,
    pub schedule: Schedule,
    pub location: Option<GeoLocation>,
    /// Day ordinal periodic intervals count from.  Persisted with the
    /// channel so a reboot does not restart the interval.
    pub anchor_day: Option<u32>,
}

/// System conditions that suppress scheduling for a whole pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct Backpressure {
    pub fault: bool,
    pub freeze_lockout: bool,
    /// Skip when at least this many tasks are already queued.
    pub max_queue_depth: usize,
}

/// Dedupe bookkeeping per channel.
#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    last_fired_day: Option<u32>,
    auto_last_checked_day: Option<u32>,
    auto_ran_today: bool,
}

#[derive(Debug)]
pub struct Scheduler {
    state: [ChannelState; MAX_CHANNELS],
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            state: [ChannelState::default(); MAX_CHANNELS],
        }
    }

    /// Forget dedupe state for a channel whose schedule was rewritten.
    pub fn reset_channel(&mut self, channel: u8) {
        if let Some(s) = self.state.get_mut(usize::from(channel)) {
            *s = ChannelState::default();
        }
    }

    /// Evaluate every enabled schedule once.  Returns the number of tasks
    /// handed to the delegate.
    ///
    /// `window_min` is the scheduler cadence in minutes.
    pub fn tick(
        &mut self,
        now: &LocalTime,
        plans: &[ChannelPlan],
        backpressure: Backpressure,
        window_min: u16,
        delegate: &mut dyn SchedulerDelegate,
    ) -> usize {
        if backpressure.fault {
            info!("Scheduler: skipped, system in fault");
            return 0;
        }
        if backpressure.freeze_lockout {
            info!("Scheduler: skipped, freeze lockout active");
            return 0;
        }
        if delegate.queue_depth() >= backpressure.max_queue_depth {
            info!(
                "Scheduler: skipped, {} tasks already queued",
                delegate.queue_depth()
            );
            return 0;
        }

        let window = window_min.max(1);
        let mut fired = 0;
        for plan in plans {
            if !plan.schedule.enabled {
                continue;
            }
            let Some(state) = self.state.get_mut(usize::from(plan.channel)) else {
                continue;
            };
            let start_min = start_minutes(plan, now);

            let task = match plan.schedule.kind {
                ScheduleKind::Daily { days_of_week } => {
                    let Some((day, dow)) = fire_day(now, start_min, window) else {
                        continue;
                    };
                    if days_of_week & weekday_bit(dow) == 0 || state.last_fired_day == Some(day) {
                        continue;
                    }
                    state.last_fired_day = Some(day);
                    Task {
                        channel: plan.channel,
                        target: plan.schedule.target,
                        trigger: Trigger::Scheduled,
                    }
                }

                ScheduleKind::Periodic { interval_days } => {
                    let Some(anchor) = plan.anchor_day else {
                        debug!("Scheduler: channel {} has no interval anchor yet", plan.channel);
                        continue;
                    };
                    let Some((day, _)) = fire_day(now, start_min, window) else {
                        continue;
                    };
                    if interval_days == 0
                        || day < anchor
                        || (day - anchor) % u32::from(interval_days) != 0
                        || state.last_fired_day == Some(day)
                    {
                        continue;
                    }
                    state.last_fired_day = Some(day);
                    Task {
                        channel: plan.channel,
                        target: plan.schedule.target,
                        trigger: Trigger::Scheduled,
                    }
                }

                ScheduleKind::Auto => {
                    let today = now.day_ordinal();
                    if state.auto_last_checked_day != Some(today) {
                        state.auto_ran_today = false;
                    }
                    if state.auto_ran_today || now.minutes_of_day() < start_min {
                        continue;
                    }
                    let missed = match state.auto_last_checked_day {
                        Some(last) if today > last + 1 => today - last - 1,
                        _ => 0,
                    };
                    state.auto_last_checked_day = Some(today);
                    state.auto_ran_today = true;

                    if missed > 0 {
                        info!(
                            "Scheduler: channel {} catching up {} missed days",
                            plan.channel, missed
                        );
                    }
                    let decision = match delegate.irrigation_demand(plan.channel, missed) {
                        Ok(d) => d,
                        Err(e) => {
                            warn!(
                                "Scheduler: demand decision for channel {} failed: {e}",
                                plan.channel
                            );
                            continue;
                        }
                    };
                    debug!(
                        "Scheduler: channel {} deficit {:.1} mm, water={} {:.1} L",
                        plan.channel, decision.deficit_mm, decision.should_water, decision.volume_liters
                    );
                    if !decision.should_water || decision.volume_liters <= 0.0 {
                        continue;
                    }
                    Task::volume(plan.channel, decision.volume_liters, Trigger::Scheduled)
                }
            };

            if delegate.queue_depth() >= backpressure.max_queue_depth {
                info!(
                    "Scheduler: channel {} deferred by queue backpressure",
                    plan.channel
                );
                continue;
            }
            match delegate.on_schedule_fired(task) {
                Ok(()) => {
                    info!(
                        "Scheduler: channel {} fired at {:02}:{:02}",
                        plan.channel, now.hour, now.minute
                    );
                    fired += 1;
                }
                Err(e) => warn!("Scheduler: channel {} not queued: {e}", plan.channel),
            }
        }
        fired
    }
}

/// Configured start, shifted to sunrise/sunset when requested and computable.
fn start_minutes(plan: &ChannelPlan, now: &LocalTime) -> u16 {
    let fixed = plan.schedule.start.minutes_of_day();
    let (Some(solar), Some(loc)) = (plan.schedule.solar, plan.location) else {
        return fixed;
    };
    match solar::event_minutes(
        loc.latitude,
        loc.longitude,
        now.julian_day,
        now.utc_offset_minutes,
        solar.event,
    ) {
        Some(event_min) => {
            let shifted = i32::from(event_min) + i32::from(solar.offset_minutes);
            shifted.rem_euclid(i32::from(MINUTES_PER_DAY)) as u16
        }
        None => {
            debug!(
                "Scheduler: no {:?} for channel {}, using fixed start",
                solar.event, plan.channel
            );
            fixed
        }
    }
}

/// If `now` lies inside `[start, start + window)`, the day ordinal and
/// weekday on which that window opened.
fn fire_day(now: &LocalTime, start_min: u16, window: u16) -> Option<(u32, u8)> {
    let now_min = now.minutes_of_day();
    let delta = (now_min + MINUTES_PER_DAY - start_min) % MINUTES_PER_DAY;
    if delta >= window {
        return None;
    }
    if now_min >= start_min {
        Some((now.day_ordinal(), now.day_of_week))
    } else {
        // Window opened before midnight.
        Some((now.day_ordinal() - 1, (now.day_of_week + 6) % 7))
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
