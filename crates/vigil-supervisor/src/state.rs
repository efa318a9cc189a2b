//! Per-instance lifecycle state machine.
//!
//! ```text
//! stopped ──► launching ──► running ──► restarting ──► launching ...
//!                │             │             │
//!                │             │             └──► failed_permanently
//!                └─────────────┴──► failed_permanently / stopped
//! ```
//!
//! `stopped` and `failed_permanently` are terminal for automatic
//! supervision; only an operator command leaves them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use vigil_common::{ProcessError, ProcessResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Stopped,
    Launching,
    Running,
    Restarting,
    FailedPermanently,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Launching => "launching",
            ProcessState::Running => "running",
            ProcessState::Restarting => "restarting",
            ProcessState::FailedPermanently => "failed_permanently",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::FailedPermanently)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ProcessStateMachine {
    process_id: String,
    state: ProcessState,
    last_transition: DateTime<Utc>,
}

impl ProcessStateMachine {
    pub fn new(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            state: ProcessState::Stopped,
            last_transition: Utc::now(),
        }
    }

    pub fn current_state(&self) -> ProcessState {
        self.state
    }

    pub fn last_transition(&self) -> DateTime<Utc> {
        self.last_transition
    }

    pub fn transition_to_launching(&mut self) -> ProcessResult<()> {
        self.transition(
            ProcessState::Launching,
            &[ProcessState::Stopped, ProcessState::Restarting],
        )
    }

    pub fn transition_to_running(&mut self) -> ProcessResult<()> {
        self.transition(ProcessState::Running, &[ProcessState::Launching])
    }

    pub fn transition_to_restarting(&mut self) -> ProcessResult<()> {
        self.transition(ProcessState::Restarting, &[ProcessState::Running])
    }

    pub fn transition_to_failed(&mut self) -> ProcessResult<()> {
        self.transition(
            ProcessState::FailedPermanently,
            &[ProcessState::Launching, ProcessState::Restarting],
        )
    }

    pub fn transition_to_stopped(&mut self) -> ProcessResult<()> {
        self.transition(
            ProcessState::Stopped,
            &[
                ProcessState::Launching,
                ProcessState::Running,
                ProcessState::Restarting,
                ProcessState::FailedPermanently,
            ],
        )
    }

    fn transition(&mut self, to: ProcessState, allowed_from: &[ProcessState]) -> ProcessResult<()> {
        if !allowed_from.contains(&self.state) {
            return Err(ProcessError::invalid_state(
                self.process_id.clone(),
                self.state.as_str(),
                to.as_str(),
            ));
        }

        debug!("Process {}: {} -> {}", self.process_id, self.state, to);
        self.state = to;
        self.last_transition = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_lifecycle() {
        let mut machine = ProcessStateMachine::new("voice-resolver-0");
        assert_eq!(machine.current_state(), ProcessState::Stopped);

        machine.transition_to_launching().unwrap();
        machine.transition_to_running().unwrap();
        machine.transition_to_restarting().unwrap();
        machine.transition_to_launching().unwrap();
        machine.transition_to_running().unwrap();
        machine.transition_to_stopped().unwrap();

        assert_eq!(machine.current_state(), ProcessState::Stopped);
    }

    #[test]
    fn test_give_up_after_restarting() {
        let mut machine = ProcessStateMachine::new("voice-resolver-0");
        machine.transition_to_launching().unwrap();
        machine.transition_to_running().unwrap();
        machine.transition_to_restarting().unwrap();
        machine.transition_to_failed().unwrap();

        assert!(machine.current_state().is_terminal());
        // No automatic way out of a permanent failure
        assert!(machine.transition_to_launching().is_err());
        machine.transition_to_stopped().unwrap();
    }

    #[test]
    fn test_invalid_transitions() {
        let mut machine = ProcessStateMachine::new("voice-resolver-0");

        let err = machine.transition_to_running().unwrap_err();
        assert!(matches!(err, ProcessError::InvalidState { .. }));
        assert!(err.to_string().contains("stopped"));

        assert!(machine.transition_to_restarting().is_err());
        assert!(machine.transition_to_failed().is_err());
        assert!(machine.transition_to_stopped().is_err());
    }

    #[test]
    fn test_launch_failure_is_terminal() {
        let mut machine = ProcessStateMachine::new("voice-resolver-0");
        machine.transition_to_launching().unwrap();
        machine.transition_to_failed().unwrap();
        assert_eq!(machine.current_state(), ProcessState::FailedPermanently);
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&ProcessState::FailedPermanently).unwrap(),
            "\"failed_permanently\""
        );
        assert_eq!(ProcessState::Running.to_string(), "running");
    }
}
