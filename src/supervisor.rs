//! Launching, stopping and listing tracked child processes.

use crate::bus::EventKind;
use crate::cmdline;
use crate::core::{LaunchMode, ProcessStatus};
use crate::error::{RegistryError, SupervisorError};
use crate::instance::Instance;
use crate::platform::{self, ReapOutcome};
use chrono::{DateTime, Utc};
use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One row of the read-only listing.
#[derive(Debug, Clone)]
pub struct ProcessEntry {
    pub pid: i32,
    pub owner: Option<i32>,
    pub command: String,
    pub mode: LaunchMode,
    pub status: ProcessStatus,
    pub started_at: DateTime<Utc>,
}

impl ProcessEntry {
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.started_at)
    }
}

/// Starts a child process and records it in the shared registry.
///
/// Attached mode blocks until the child exits, marks the record terminated
/// and publishes the stop event before returning. Detached mode returns as
/// soon as the launch is recorded; the child runs in its own session and the
/// reaper detects its termination later.
///
/// If the table is full the just-spawned child is killed and reaped before
/// the capacity error is returned: a forked process is never left behind
/// unrecorded.
pub fn start(
    instance: &Instance,
    command_line: &str,
    mode: LaunchMode,
) -> Result<i32, SupervisorError> {
    let argv = cmdline::tokenize(command_line);
    if argv.is_empty() {
        return Err(SupervisorError::EmptyCommand);
    }

    let mut command = Command::new(&argv[0]);
    command.args(&argv[1..]);
    if mode == LaunchMode::Detached {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        // A detached child gets its own session so it survives this
        // instance's session lifetime.
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    let mut child = command.spawn().map_err(|source| SupervisorError::Spawn {
        command: argv[0].clone(),
        source,
    })?;
    let pid = child.id() as i32;

    let recorded = instance.registry().with_state(|s| {
        s.insert_record(pid, instance.pid(), command_line.trim(), mode, Utc::now())
    })?;
    let idx = match recorded {
        Ok(idx) => idx,
        Err(err) => {
            // Table full: the child must not outlive the failed bookkeeping.
            let _ = child.kill();
            let _ = child.wait();
            warn!(pid, "process table full; launch rolled back");
            return Err(err.into());
        }
    };

    instance.notify_peers(EventKind::ProcessStarted, pid);
    info!(pid, %mode, command = command_line.trim(), "process started");

    match mode {
        LaunchMode::Detached => Ok(pid),
        LaunchMode::Attached => {
            if let Err(err) = child.wait() {
                // The wait itself failing does not change what the registry
                // must reflect; proceed to reclaim the slot.
                warn!(pid, %err, "wait on attached child failed");
            }
            let transitioned = instance
                .registry()
                .with_state(|s| s.mark_terminated_at(idx, pid))?;
            if transitioned {
                instance.notify_peers(EventKind::ProcessStopped, pid);
            } else {
                debug!(pid, "record already reclaimed while waiting");
            }
            Ok(pid)
        }
    }
}

/// Signals the process and removes it from active accounting immediately
/// (optimistic: no wait for the OS to confirm death). A pid with no active
/// record yields `RegistryError::NotFound` and no side effect, including
/// for the loser of a concurrent double stop.
pub fn stop(instance: &Instance, pid: i32) -> Result<(), SupervisorError> {
    let stopped = instance.registry().with_state(|s| {
        s.find_by_pid(pid).map(|idx| {
            let own_child = s.records[idx].owner() == Some(instance.pid());
            platform::terminate_process(pid);
            s.mark_terminated_at(idx, pid);
            own_child
        })
    })?;

    match stopped {
        Some(own_child) => {
            if own_child {
                collect_child(pid);
            }
            instance.notify_peers(EventKind::ProcessStopped, pid);
            info!(pid, "process stopped");
            Ok(())
        }
        None => Err(RegistryError::NotFound(pid).into()),
    }
}

/// SIGTERM delivery is asynchronous; when the stopped process is our own
/// child, collect its exit status now so it does not sit as a zombie until
/// this instance exits.
fn collect_child(pid: i32) {
    for _ in 0..50 {
        match platform::reap_nonblocking(pid) {
            ReapOutcome::Exited | ReapOutcome::NotOurChild => return,
            ReapOutcome::StillRunning => std::thread::sleep(Duration::from_millis(10)),
        }
    }
    debug!(pid, "stopped child did not exit within the reap window");
}

/// Snapshot of all active records for rendering.
pub fn list(instance: &Instance) -> Result<Vec<ProcessEntry>, RegistryError> {
    let records = instance.registry().with_state(|s| s.snapshot())?;
    Ok(records
        .into_iter()
        .map(|r| ProcessEntry {
            pid: r.pid,
            owner: r.owner(),
            command: r.command(),
            mode: r.mode(),
            status: r.status(),
            started_at: r.started_at(),
        })
        .collect())
}
