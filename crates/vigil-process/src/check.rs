//! Process existence checks.

/// Whether a process with this PID is alive.
#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw_pid) = i32::try_from(pid) else {
        return false;
    };
    if raw_pid <= 0 {
        return false;
    }

    // Signal 0 performs the permission and existence checks only
    match kill(Pid::from_raw(raw_pid), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        // Exists but owned by someone else
        Err(_) => true,
    }
}

#[cfg(not(unix))]
pub fn process_exists(_pid: u32) -> bool {
    false
}
