//! Inbound commands to the watering system.
//!
//! These represent actions requested by the outside world (BLE, serial,
//! local buttons) that [`WateringSystem`](super::service::WateringSystem)
//! interprets and acts upon.

use log::info;

use crate::config::SystemConfig;
use crate::error::Result;
use crate::model::{Schedule, Task, Trigger};
use crate::power::PowerMode;
use crate::safety::LockScope;

use super::ports::Platform;
use super::service::{StatusReport, WateringSystem};

/// Commands that external adapters can send into the core.
#[derive(Debug, Clone)]
pub enum Command {
    /// Water `channel` for a number of minutes.
    WaterDuration { channel: u8, minutes: u16, trigger: Trigger },

    /// Deliver a volume to `channel`.
    WaterVolume { channel: u8, liters: f32, trigger: Trigger },

    StopCurrent,
    PauseCurrent,
    ResumeCurrent,

    /// Stop everything and force all valves closed.
    CloseAll,

    /// Manual reset out of a flow fault.
    ClearErrors,

    SetPowerMode(PowerMode),
    SetFlowCalibration(u32),
    UpdateSchedule { channel: u8, schedule: Schedule },
    UpdateConfig(SystemConfig),

    /// An external controller will start a task in `in_ms`; keep the master
    /// open across the gap if it falls inside the overlap grace.
    ExpectTaskStart { in_ms: u32 },

    /// Let manual/remote tasks through soft locks and rain skips.
    SetManualOverride { channel: u8, minutes: u16 },
    ClearLock(LockScope),

    GetStatus,
    GetQueueDepth,
}

/// What a command produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Done,
    /// Whether the command changed anything (stop/pause/resume/clear).
    Applied(bool),
    Status(StatusReport),
    QueueDepth(usize),
}

impl<P: Platform> WateringSystem<P> {
    pub fn handle_command(&mut self, cmd: Command) -> Result<CommandOutcome> {
        info!("command: {:?}", cmd);
        let outcome = match cmd {
            Command::WaterDuration {
                channel,
                minutes,
                trigger,
            } => {
                self.enqueue(Task::duration(channel, minutes, trigger))?;
                CommandOutcome::Done
            }
            Command::WaterVolume {
                channel,
                liters,
                trigger,
            } => {
                self.enqueue(Task::volume(channel, liters, trigger))?;
                CommandOutcome::Done
            }
            Command::StopCurrent => CommandOutcome::Applied(self.stop_current()),
            Command::PauseCurrent => CommandOutcome::Applied(self.pause_current()),
            Command::ResumeCurrent => CommandOutcome::Applied(self.resume_current()),
            Command::CloseAll => {
                self.close_all()?;
                CommandOutcome::Done
            }
            Command::ClearErrors => CommandOutcome::Applied(self.clear_errors()),
            Command::SetPowerMode(mode) => {
                self.set_power_mode(mode);
                CommandOutcome::Done
            }
            Command::SetFlowCalibration(ppl) => {
                self.set_flow_calibration(ppl)?;
                CommandOutcome::Done
            }
            Command::UpdateSchedule { channel, schedule } => {
                self.update_schedule(channel, schedule)?;
                CommandOutcome::Done
            }
            Command::UpdateConfig(cfg) => {
                self.update_config(cfg)?;
                CommandOutcome::Done
            }
            Command::ExpectTaskStart { in_ms } => {
                let now = self.platform.now_ms();
                self.notify_expected_start(now + u64::from(in_ms));
                CommandOutcome::Done
            }
            Command::SetManualOverride { channel, minutes } => {
                self.set_manual_override(channel, u64::from(minutes) * 60_000)?;
                CommandOutcome::Done
            }
            Command::ClearLock(scope) => {
                self.clear_hydraulic_lock(scope)?;
                CommandOutcome::Done
            }
            Command::GetStatus => CommandOutcome::Status(self.get_status()),
            Command::GetQueueDepth => CommandOutcome::QueueDepth(self.queue_depth()),
        };
        Ok(outcome)
    }
}
