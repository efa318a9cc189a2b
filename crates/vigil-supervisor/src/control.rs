//! The seam between the supervisor and a single supervised instance.

use crate::lifecycle::RestartStats;
use crate::state::ProcessState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use vigil_common::ProcessResult;

/// `<app name>-<instance index>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId {
    pub name: String,
    pub instance: u32,
}

impl InstanceId {
    pub fn new(name: impl Into<String>, instance: u32) -> Self {
        Self {
            name: name.into(),
            instance,
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.instance)
    }
}

/// Point-in-time view of one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub name: String,
    pub instance: u32,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    /// Up for at least `min_uptime` since the last launch.
    pub stable: bool,
    pub restart_stats: RestartStats,
    pub last_exit_code: Option<i32>,
    pub memory_bytes: Option<u64>,
    pub last_error: Option<String>,
}

impl InstanceStatus {
    pub fn new(id: &InstanceId) -> Self {
        Self {
            name: id.name.clone(),
            instance: id.instance,
            state: ProcessState::Stopped,
            pid: None,
            started_at: None,
            stable: false,
            restart_stats: RestartStats::default(),
            last_exit_code: None,
            memory_bytes: None,
            last_error: None,
        }
    }

    pub fn uptime(&self) -> Option<Duration> {
        if self.state != ProcessState::Running {
            return None;
        }
        self.started_at
            .and_then(|started| (Utc::now() - started).to_std().ok())
    }
}

/// Operator control over one instance.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    fn id(&self) -> &InstanceId;

    /// Launch the instance unless it is already supervised.
    async fn start(&mut self) -> ProcessResult<()>;

    /// Stop the instance and wait for supervision to end.
    async fn stop(&mut self) -> ProcessResult<()>;

    /// Restart a supervised instance, or relaunch a stopped or failed one.
    async fn restart(&mut self) -> ProcessResult<()>;

    async fn status(&self) -> InstanceStatus;
}
