//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing every [`WateringEvent`] to the
//! ESP-IDF logger (UART / USB-CDC in production) as one tagged line.
//! A BLE notification adapter would implement the same trait.

use log::{error, info, warn};

use crate::app::events::{AlarmKind, WateringEvent};
use crate::app::ports::EventSink;
use crate::model::Target;

/// Adapter that logs every [`WateringEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

struct ShowTarget(Target);

impl core::fmt::Display for ShowTarget {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.0 {
            Target::Duration { minutes } => write!(f, "{} min", minutes),
            Target::Volume { liters } => write!(f, "{:.1} L", liters),
        }
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &WateringEvent) {
        match event {
            WateringEvent::TaskQueued {
                channel,
                trigger,
                depth,
            } => info!("TASK | queued ch={} trigger={:?} depth={}", channel, trigger, depth),
            WateringEvent::TaskStarted {
                channel,
                target,
                trigger,
            } => info!(
                "TASK | started ch={} target={} trigger={:?}",
                channel,
                ShowTarget(*target),
                trigger
            ),
            WateringEvent::TaskProgress {
                channel,
                percent,
                liters,
            } => info!("TASK | progress ch={} {}% ({:.2} L)", channel, percent, liters),
            WateringEvent::TaskPaused { channel } => info!("TASK | paused ch={}", channel),
            WateringEvent::TaskResumed { channel } => info!("TASK | resumed ch={}", channel),
            WateringEvent::TaskCompleted(r) => info!(
                "TASK | done ch={} reason={} target={} elapsed={}s pulses={} volume={:.2} L",
                r.channel,
                r.reason.name(),
                ShowTarget(r.target),
                r.elapsed_ms / 1_000,
                r.pulses,
                r.volume_liters
            ),
            WateringEvent::TaskSkipped { channel, reason } => {
                info!("TASK | skipped ch={} reason={}", channel, reason.name());
            }
            WateringEvent::Alarm {
                kind,
                channel,
                value,
            } => match kind {
                AlarmKind::Freeze => warn!(
                    "ALARM | freeze temp={}",
                    if *value == crate::safety::NO_TEMPERATURE {
                        "n/a".into()
                    } else {
                        format!("{:.1}\u{00b0}C", *value as f32 / 10.0)
                    }
                ),
                _ => error!("ALARM | {:?} ch={:?} value={}", kind, channel, value),
            },
            WateringEvent::ZoneValve { channel, open } => {
                info!("VALVE | zone {} {}", channel, if *open { "OPEN" } else { "CLOSED" });
            }
            WateringEvent::MasterValve { open } => {
                info!("VALVE | master {}", if *open { "OPEN" } else { "CLOSED" });
            }
            WateringEvent::StatusChanged { from, to } => {
                info!("STATUS | {} -> {}", from.name(), to.name());
            }
            WateringEvent::StateChanged { from, to } => {
                info!("STATE | {} -> {}", from.name(), to.name());
            }
            WateringEvent::FlowUpdate { pulses } => info!("FLOW | pulses={}", pulses),
            WateringEvent::LockChanged {
                channel,
                level,
                reason,
            } => warn!(
                "LOCK | scope={} level={:?} reason={}",
                channel.map_or_else(|| "global".into(), |c| format!("ch{}", c)),
                level,
                reason.name()
            ),
        }
    }
}
