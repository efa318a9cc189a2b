//! # vigil supervisor
//!
//! Keeps the apps of an ecosystem file running.
//!
//! This crate provides:
//! - One supervision task per instance, driven through [`ProcessControl`]
//! - The restart policy: rapid-failure detection, delays and backoff
//! - Memory ceiling enforcement
//! - Restart on file changes for apps with `watch` enabled

pub mod control;
pub mod instance;
pub mod lifecycle;
pub mod manager;
pub mod state;
pub mod watch;

pub use control::{InstanceId, InstanceStatus, ProcessControl};
pub use instance::ManagedInstance;
pub use lifecycle::{ExitReason, RestartDecision, RestartPolicy, RestartStats, RestartTracker};
pub use manager::{
    ConfigDrift, ManagedApp, PreviousProcess, Supervisor, SupervisorOptions, SupervisorState,
};
pub use state::{ProcessState, ProcessStateMachine};
