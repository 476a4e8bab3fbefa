//! Thin wrappers over the process syscalls the supervisor and reaper need.

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::debug;

pub fn current_pid() -> i32 {
    std::process::id() as i32
}

/// Liveness probe via the null signal. `EPERM` means the process exists but
/// belongs to someone else, so it counts as alive.
pub fn process_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// True only when the pid is known to no longer exist. Probe failures other
/// than `ESRCH` are not a termination signal.
pub fn process_gone(pid: i32) -> bool {
    matches!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH))
}

/// Best-effort SIGTERM; the target may already be dead.
pub fn terminate_process(pid: i32) {
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => debug!(pid, %err, "SIGTERM failed"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    Exited,
    StillRunning,
    /// Not a waitable child of this process (already reaped elsewhere, or a
    /// record inherited from a previous instance with the same pid).
    NotOurChild,
}

/// Non-blocking reap of one specific child.
pub fn reap_nonblocking(pid: i32) -> ReapOutcome {
    match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => ReapOutcome::StillRunning,
        Ok(_) => ReapOutcome::Exited,
        Err(Errno::ECHILD) => ReapOutcome::NotOurChild,
        Err(err) => {
            debug!(pid, %err, "waitpid failed");
            ReapOutcome::StillRunning
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn probe_detects_live_and_dead_pids() {
        assert!(process_alive(current_pid()));
        assert!(!process_gone(current_pid()));

        // A child that has exited and been reaped leaves a pid the probe
        // must classify as gone (this validates the liveness-probe path the
        // reaper relies on for disowned records).
        let mut child = Command::new("/bin/true").spawn().unwrap();
        let pid = child.id() as i32;
        child.wait().unwrap();
        assert!(process_gone(pid));
        assert!(!process_alive(pid));
    }

    #[test]
    fn nonblocking_reap_of_own_child() {
        let mut child = Command::new("/bin/sleep").arg("5").spawn().unwrap();
        let pid = child.id() as i32;
        assert_eq!(reap_nonblocking(pid), ReapOutcome::StillRunning);

        terminate_process(pid);
        // The signal is asynchronous; poll briefly.
        let mut outcome = ReapOutcome::StillRunning;
        for _ in 0..50 {
            outcome = reap_nonblocking(pid);
            if outcome == ReapOutcome::Exited {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert_eq!(outcome, ReapOutcome::Exited);
        // Already reaped above.
        assert_eq!(reap_nonblocking(pid), ReapOutcome::NotOurChild);
        let _ = child.try_wait();
    }
}
