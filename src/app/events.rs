//! Outbound watering events.
//!
//! The [`WateringSystem`](super::service::WateringSystem) emits these
//! through the [`EventSink`](super::ports::EventSink) port.  Adapters on
//! the other side decide what to do with them; the shipped one logs each
//! event to serial.

use crate::fsm::{SystemState, SystemStatus};
use crate::model::{SkipReason, Target, Trigger};
use crate::safety::{LockLevel, LockReason};

/// Alarm categories forwarded to telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmKind {
    NoFlow,
    UnexpectedFlow,
    Freeze,
    Generic,
}

/// Why an active task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Target duration or volume reached.
    Completed,
    /// Hard per-task ceiling reached first.
    TimeLimit,
    /// Stopped on request.
    Manual,
    /// Stopped by the flow monitor.
    NoFlow,
    /// Stopped by a safety veto or fault shutdown.
    Safety,
}

impl StopReason {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::TimeLimit => "time limit",
            Self::Manual => "manual stop",
            Self::NoFlow => "no flow",
            Self::Safety => "safety",
        }
    }
}

/// Actual values delivered by a finished task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionReport {
    pub channel: u8,
    pub trigger: Trigger,
    /// Target after any rain reduction.
    pub target: Target,
    pub elapsed_ms: u64,
    pub pulses: u32,
    pub volume_liters: f32,
    pub reason: StopReason,
}

/// Structured events emitted by the watering engine.
#[derive(Debug, Clone, PartialEq)]
pub enum WateringEvent {
    /// A task entered the queue; `depth` is the new queue length.
    TaskQueued { channel: u8, trigger: Trigger, depth: u8 },

    /// A task left the queue and its valve is open.
    TaskStarted {
        channel: u8,
        target: Target,
        trigger: Trigger,
    },

    /// Volume task crossed another progress step.
    TaskProgress {
        channel: u8,
        percent: u8,
        liters: f32,
    },

    TaskPaused { channel: u8 },
    TaskResumed { channel: u8 },
    TaskCompleted(CompletionReport),

    /// A request was vetoed before it reached the queue.
    TaskSkipped { channel: u8, reason: SkipReason },

    Alarm {
        kind: AlarmKind,
        channel: Option<u8>,
        /// Kind-specific payload: attempt number, pulse count, or °C × 10.
        value: i32,
    },

    ZoneValve { channel: u8, open: bool },
    MasterValve { open: bool },

    StatusChanged { from: SystemStatus, to: SystemStatus },
    StateChanged { from: SystemState, to: SystemState },

    /// Deferred pulse-counter notification.
    FlowUpdate { pulses: u32 },

    /// A hydraulic lock was set or cleared.  `channel` is `None` for the global lock.
    LockChanged {
        channel: Option<u8>,
        level: LockLevel,
        reason: LockReason,
    },
}
