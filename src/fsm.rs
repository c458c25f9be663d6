//! System state machine and externally observable status.
//!
//! ```text
//!          start            pause
//!   Idle ────────▶ Watering ──────▶ Paused
//!    ▲  ◀──────────  │   ◀──────────  │
//!    │  stop/done    │     resume     │ stop
//!    │               ▼                ▼
//!    └──────── ErrorRecovery ◀──── (any)
//!      clear_errors
//! ```
//!
//! Transitions are checked against a fixed table; an illegal request is
//! logged and ignored so a confused caller cannot wedge the engine in an
//! impossible state.

use log::{info, warn};

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SystemState {
    Idle = 0,
    Watering = 1,
    Paused = 2,
    ErrorRecovery = 3,
}

impl SystemState {
    pub const COUNT: usize = 4;

    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Watering => "WATERING",
            Self::Paused => "PAUSED",
            Self::ErrorRecovery => "ERROR_RECOVERY",
        }
    }
}

/// `ALLOWED[from][to]`
const ALLOWED: [[bool; SystemState::COUNT]; SystemState::COUNT] = [
    //  Idle   Water  Paused ErrRec
    [false, true, false, true],  // Idle
    [true, false, true, true],   // Watering
    [true, true, false, true],   // Paused
    [true, false, false, false], // ErrorRecovery
];

// ---------------------------------------------------------------------------
// Observable status
// ---------------------------------------------------------------------------

/// Health summary reported to the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SystemStatus {
    #[default]
    Ok,
    NoFlow,
    UnexpectedFlow,
    Fault,
    RtcError,
    LowPower,
    Locked,
    FreezeLockout,
}

impl SystemStatus {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NoFlow => "NO_FLOW",
            Self::UnexpectedFlow => "UNEXPECTED_FLOW",
            Self::Fault => "FAULT",
            Self::RtcError => "RTC_ERROR",
            Self::LowPower => "LOW_POWER",
            Self::Locked => "LOCKED",
            Self::FreezeLockout => "FREEZE_LOCKOUT",
        }
    }

    /// Flow-fault statuses that only `clear_errors` (or observed flow) resolves.
    pub const fn is_flow_fault(self) -> bool {
        matches!(self, Self::NoFlow | Self::UnexpectedFlow | Self::Fault)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct StateMachine {
    current: SystemState,
    entered_at_ms: u64,
    transitions: u32,
}

impl StateMachine {
    pub const fn new() -> Self {
        Self {
            current: SystemState::Idle,
            entered_at_ms: 0,
            transitions: 0,
        }
    }

    pub const fn current(&self) -> SystemState {
        self.current
    }

    pub fn time_in_state(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.entered_at_ms)
    }

    pub const fn transition_count(&self) -> u32 {
        self.transitions
    }

    pub fn can_transition(&self, next: SystemState) -> bool {
        ALLOWED[self.current as usize][next as usize]
    }

    /// Move to `next` if the table allows it.
    ///
    /// Returns the `(from, to)` pair on an actual change, `None` when
    /// already in `next` or when the move is illegal.
    pub fn transition(
        &mut self,
        next: SystemState,
        now_ms: u64,
    ) -> Option<(SystemState, SystemState)> {
        if next == self.current {
            return None;
        }
        if !self.can_transition(next) {
            warn!(
                "FSM rejected transition: {} -> {}",
                self.current.name(),
                next.name()
            );
            return None;
        }
        let from = self.current;
        info!("FSM transition: {} -> {}", from.name(), next.name());
        self.current = next;
        self.entered_at_ms = now_ms;
        self.transitions = self.transitions.wrapping_add(1);
        Some((from, next))
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
