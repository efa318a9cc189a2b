//! Process termination primitives.

use tracing::debug;
use vigil_common::{ProcessError, ProcessResult};

/// Terminate a process gracefully (SIGTERM).
pub fn terminate_gracefully(pid: u32) -> ProcessResult<()> {
    debug!("Sending SIGTERM to PID {}", pid);
    send_signal(pid, Signal::Terminate)
}

/// Force kill a process (SIGKILL).
pub fn force_kill(pid: u32) -> ProcessResult<()> {
    debug!("Sending SIGKILL to PID {}", pid);
    send_signal(pid, Signal::Kill)
}

enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> ProcessResult<()> {
    use nix::sys::signal::{kill, Signal as NixSignal};
    use nix::unistd::Pid;

    let raw_pid = i32::try_from(pid)
        .map_err(|_| ProcessError::stop_failed(pid.to_string(), "PID out of range"))?;
    let signal = match signal {
        Signal::Terminate => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };

    kill(Pid::from_raw(raw_pid), signal)
        .map_err(|e| ProcessError::stop_failed(pid.to_string(), e.to_string()))
}

#[cfg(not(unix))]
fn send_signal(pid: u32, _signal: Signal) -> ProcessResult<()> {
    Err(ProcessError::stop_failed(
        pid.to_string(),
        "signals are only supported on unix",
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_terminate_running_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();

        terminate_gracefully(child.id()).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_force_kill_running_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();

        force_kill(child.id()).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_signal_out_of_range_pid() {
        assert!(matches!(
            terminate_gracefully(u32::MAX),
            Err(ProcessError::StopFailed { .. })
        ));
    }
}
