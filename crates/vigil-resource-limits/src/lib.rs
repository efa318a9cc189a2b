//! # vigil resource limits
//!
//! Resource sampling for supervised processes and the memory ceiling check
//! that drives forced restarts.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use sysinfo::{Pid, System};
use tracing::debug;
use vigil_common::{ProcessError, ProcessResult};

/// Resource usage information for a process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Resident set size in bytes.
    pub memory_bytes: u64,
    pub cpu_percent: f32,
}

/// Memory ceiling exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryViolation {
    pub resident_bytes: u64,
    pub ceiling_bytes: u64,
}

impl std::fmt::Display for MemoryViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "resident memory {} bytes exceeds ceiling {} bytes",
            self.resident_bytes, self.ceiling_bytes
        )
    }
}

/// Resource monitor that tracks process resource usage
pub struct ResourceMonitor {
    system: Mutex<System>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Get current resource usage for a process
    pub fn usage(&self, pid: u32) -> ProcessResult<ResourceUsage> {
        let mut system = self.system.lock().map_err(|_| ProcessError::Monitoring {
            id: pid.to_string(),
            reason: "resource monitor lock poisoned".to_string(),
        })?;

        let sysinfo_pid = Pid::from_u32(pid);
        if !system.refresh_process(sysinfo_pid) {
            return Err(ProcessError::Monitoring {
                id: pid.to_string(),
                reason: format!("process with PID {} not found", pid),
            });
        }

        let process = system
            .process(sysinfo_pid)
            .ok_or_else(|| ProcessError::Monitoring {
                id: pid.to_string(),
                reason: format!("process with PID {} not found", pid),
            })?;

        let usage = ResourceUsage {
            memory_bytes: process.memory(),
            cpu_percent: process.cpu_usage(),
        };

        debug!(
            "Resource usage for PID {}: CPU={:.1}%, RSS={} bytes",
            pid, usage.cpu_percent, usage.memory_bytes
        );
        Ok(usage)
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// A ceiling is exceeded only when resident memory is strictly above it.
pub fn check_memory_ceiling(usage: &ResourceUsage, ceiling_bytes: u64) -> Option<MemoryViolation> {
    (usage.memory_bytes > ceiling_bytes).then_some(MemoryViolation {
        resident_bytes: usage.memory_bytes,
        ceiling_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(memory_bytes: u64) -> ResourceUsage {
        ResourceUsage {
            memory_bytes,
            cpu_percent: 0.0,
        }
    }

    #[test]
    fn test_check_memory_ceiling() {
        let ceiling = 500 * 1024 * 1024;

        assert_eq!(check_memory_ceiling(&usage(ceiling - 1), ceiling), None);
        assert_eq!(check_memory_ceiling(&usage(ceiling), ceiling), None);

        let violation = check_memory_ceiling(&usage(ceiling + 1), ceiling).unwrap();
        assert_eq!(violation.resident_bytes, ceiling + 1);
        assert_eq!(violation.ceiling_bytes, ceiling);
        assert!(violation.to_string().contains("exceeds"));
    }

    #[test]
    fn test_sample_current_process() {
        let monitor = ResourceMonitor::new();
        let usage = monitor.usage(std::process::id()).unwrap();
        assert!(usage.memory_bytes > 0);
    }

    #[test]
    fn test_sample_missing_process() {
        let monitor = ResourceMonitor::new();
        assert!(monitor.usage(u32::MAX - 1).is_err());
    }
}
