//! Flow anomaly detector.
//!
//! Works on a [`FlowSnapshot`] taken under the state lock and returns a
//! [`FlowVerdict`] that the watering system applies afterwards, so the
//! monitor itself never holds the state lock.  Applying a no-flow verdict
//! stops and re-enqueues the task, which needs the lock again; evaluating
//! outside it keeps the lock order flat.
//!
//! ## Escalation
//!
//! ```text
//!   OK ──no flow──▶ NoFlow (retry) ──…──▶ Fault (after max attempts)
//!    ▲                 │
//!    └──flow seen──────┘
//! ```
//!
//! Leak detection keeps running while the system is faulted: a fault only
//! stops the active-task checks, and an idle leak still closes everything.
//!
//! The stall watchdog is measured in *effective* task time (pause time
//! excluded), so a paused task never accrues stall time and resuming does
//! not trip the watchdog.

use log::{debug, error, info, warn};

use crate::config::SystemConfig;
use crate::fsm::SystemStatus;
use crate::model::Task;

/// View of the active task needed for no-flow detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveFlowView {
    pub seq: u32,
    pub task: Task,
    pub effective_elapsed_ms: u64,
    pub paused: bool,
}

/// Everything the monitor reads, captured in one critical section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowSnapshot {
    pub now_ms: u64,
    pub pulses: u32,
    pub active: Option<ActiveFlowView>,
    pub status: SystemStatus,
    /// An unexpected-flow alarm is latched.
    pub leaking: bool,
}

/// What the watering system should do after a check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlowVerdict {
    /// No pulses for the active task.  `retry` is false once the attempt
    /// budget is spent.
    NoFlow { seq: u32, task: Task, attempt: u8, retry: bool },
    /// Pulses seen again while status was NoFlow.
    FlowRestored,
    /// Pulses with every valve closed.
    UnexpectedFlow { pulses: u32 },
    /// Still leaking after the close-all; counter should be re-baselined.
    UnexpectedFlowPersists { pulses: u32 },
    /// Leak has stopped.
    UnexpectedFlowCleared,
}

#[derive(Debug, Clone, Copy)]
struct StallWatch {
    seq: u32,
    last_pulses: u32,
    last_increase_ms: u64,
}

pub struct FlowMonitor {
    check_interval_ms: u64,
    start_grace_ms: u64,
    stall_timeout_ms: u64,
    max_attempts: u8,
    unexpected_threshold: u32,

    last_check_ms: Option<u64>,
    attempts: u8,
    watch: Option<StallWatch>,
}

impl FlowMonitor {
    pub fn new(config: &SystemConfig) -> Self {
        Self {
            check_interval_ms: u64::from(config.flow_check_interval_ms),
            start_grace_ms: u64::from(config.no_flow_start_grace_ms),
            stall_timeout_ms: u64::from(config.no_flow_stall_timeout_ms),
            max_attempts: config.max_no_flow_attempts,
            unexpected_threshold: config.unexpected_flow_threshold,
            last_check_ms: None,
            attempts: 0,
            watch: None,
        }
    }

    /// Consecutive no-flow triggers since flow was last seen.
    pub const fn attempts(&self) -> u8 {
        self.attempts
    }

    /// Take new thresholds from `config`.  Attempt history is kept.
    pub fn reconfigure(&mut self, config: &SystemConfig) {
        self.check_interval_ms = u64::from(config.flow_check_interval_ms);
        self.start_grace_ms = u64::from(config.no_flow_start_grace_ms);
        self.stall_timeout_ms = u64::from(config.no_flow_stall_timeout_ms);
        self.max_attempts = config.max_no_flow_attempts;
        self.unexpected_threshold = config.unexpected_flow_threshold;
    }

    /// Forget the attempt history (fault reset).
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.watch = None;
        self.last_check_ms = None;
    }

    /// Run one check.  Returns `None` when throttled or when nothing needs
    /// doing.
    pub fn evaluate(&mut self, snap: &FlowSnapshot) -> Option<FlowVerdict> {
        if self
            .last_check_ms
            .is_some_and(|t| snap.now_ms.saturating_sub(t) < self.check_interval_ms)
        {
            return None;
        }
        self.last_check_ms = Some(snap.now_ms);

        match snap.active {
            Some(_) if snap.status == SystemStatus::Fault => {
                debug!("FLOW no-flow check skipped: system in fault");
                None
            }
            Some(view) => self.evaluate_active(snap.pulses, &view, snap.status),
            None => {
                self.watch = None;
                self.evaluate_idle(snap.pulses, snap.leaking)
            }
        }
    }

    fn evaluate_active(
        &mut self,
        pulses: u32,
        view: &ActiveFlowView,
        status: SystemStatus,
    ) -> Option<FlowVerdict> {
        if view.paused {
            return None;
        }
        let elapsed = view.effective_elapsed_ms;
        let watch = match self.watch {
            Some(w) if w.seq == view.seq => w,
            _ => StallWatch {
                seq: view.seq,
                last_pulses: 0,
                last_increase_ms: 0,
            },
        };
        let increased = pulses > watch.last_pulses;
        let watch = if increased {
            StallWatch {
                last_pulses: pulses,
                last_increase_ms: elapsed,
                ..watch
            }
        } else {
            watch
        };
        self.watch = Some(watch);

        let never_started = pulses == 0 && elapsed > self.start_grace_ms;
        let stalled =
            pulses > 0 && elapsed.saturating_sub(watch.last_increase_ms) >= self.stall_timeout_ms;

        if never_started || stalled {
            self.attempts = self.attempts.saturating_add(1);
            let retry = self.attempts < self.max_attempts;
            error!(
                "FLOW no flow on channel {} ({} pulses after {} ms, attempt {}/{})",
                view.task.channel, pulses, elapsed, self.attempts, self.max_attempts
            );
            self.watch = None;
            return Some(FlowVerdict::NoFlow {
                seq: view.seq,
                task: view.task,
                attempt: self.attempts,
                retry,
            });
        }

        if increased {
            if self.attempts > 0 {
                info!("FLOW detected on channel {}, attempts reset", view.task.channel);
            }
            self.attempts = 0;
            if status == SystemStatus::NoFlow {
                return Some(FlowVerdict::FlowRestored);
            }
        }
        None
    }

    fn evaluate_idle(&mut self, pulses: u32, leaking: bool) -> Option<FlowVerdict> {
        if leaking {
            if pulses < self.unexpected_threshold / 2 {
                info!("FLOW unexpected flow cleared ({} pulses)", pulses);
                return Some(FlowVerdict::UnexpectedFlowCleared);
            }
            warn!("FLOW still leaking: {} pulses since last check", pulses);
            return Some(FlowVerdict::UnexpectedFlowPersists { pulses });
        }
        if pulses > self.unexpected_threshold {
            error!(
                "FLOW unexpected flow: {} pulses with all valves closed",
                pulses
            );
            return Some(FlowVerdict::UnexpectedFlow { pulses });
        }
        None
    }
}
