//! Firmware lifecycle state machine.
//!
//! State transitions:
//! BOOT → INIT → RUN → STOPPED
//!
//! Peripheral bring-up failures move BOOT or INIT to FAULT, which is
//! fatal to startup.

use crate::error::{SonarError, SonarResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FirmwareState {
    /// Power-on; nothing configured yet.
    #[default]
    Boot,
    /// Pins, capture unit and serial transport being brought up.
    Init,
    /// Periodic activities running.
    Run,
    /// Bring-up or runtime fault.
    Fault,
    /// Activities joined (host runs only).
    Stopped,
}

impl fmt::Display for FirmwareState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boot => write!(f, "BOOT"),
            Self::Init => write!(f, "INIT"),
            Self::Run => write!(f, "RUN"),
            Self::Fault => write!(f, "FAULT"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl FirmwareState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: FirmwareState) -> bool {
        use FirmwareState::{Boot, Fault, Init, Run, Stopped};

        matches!(
            (self, target),
            (Boot, Init)
                | (Init, Run)
                | (Run, Stopped)
                | (Boot, Fault)
                | (Init, Fault)
                | (Run, Fault)
                | (Fault, Stopped)
        )
    }

    /// Returns true while activities are scheduled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Run)
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: FirmwareState,
    previous: Option<FirmwareState>,
    transition_count: u64,
}

impl StateMachine {
    /// Create a new state machine starting in BOOT.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> FirmwareState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<FirmwareState> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    ///
    /// # Errors
    ///
    /// Returns [`SonarError::InvalidStateTransition`] if `target` is not
    /// reachable from the current state.
    pub fn transition(&mut self, target: FirmwareState) -> SonarResult<()> {
        if self.current.can_transition_to(target) {
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(SonarError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Move to FAULT if reachable; no-op otherwise.
    pub fn enter_fault(&mut self) {
        if self.current.can_transition_to(FirmwareState::Fault) {
            self.previous = Some(self.current);
            self.current = FirmwareState::Fault;
            self.transition_count += 1;
        }
    }
}
