//! Background monitor that reclaims records of processes that died without
//! anyone calling stop.
//!
//! Every poll interval the reaper snapshots the active records, probes each
//! pid for liveness, and marks the dead ones terminated. Records owned by
//! this instance are reaped with a non-blocking `waitpid` first so detached
//! children do not linger as zombies; everything else (peer-owned or
//! disowned records) falls back to the null-signal probe.

use crate::bus::EventKind;
use crate::error::RegistryError;
use crate::instance::Instance;
use crate::platform::{self, ReapOutcome};
use crate::signal::ShutdownFlag;
use std::time::{Duration, Instant};
use tracing::{debug, info};

fn record_is_dead(pid: i32, owner: Option<i32>, own_pid: i32) -> bool {
    if owner == Some(own_pid) {
        match platform::reap_nonblocking(pid) {
            ReapOutcome::Exited => true,
            ReapOutcome::StillRunning => false,
            // Someone else already collected the exit status; the probe
            // still tells us whether the pid is gone.
            ReapOutcome::NotOurChild => platform::process_gone(pid),
        }
    } else {
        platform::process_gone(pid)
    }
}

/// One reap pass. Returns how many records transitioned.
pub fn scan_once(instance: &Instance) -> Result<usize, RegistryError> {
    let active: Vec<(usize, i32, Option<i32>)> = instance.registry().with_state(|s| {
        s.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_active())
            .map(|(idx, r)| (idx, r.pid, r.owner()))
            .collect()
    })?;

    let mut reclaimed = 0;
    for (idx, pid, owner) in active {
        if !record_is_dead(pid, owner, instance.pid()) {
            continue;
        }
        // Re-validated under the gate: between the probe and this commit
        // the slot may have been stopped and even reused.
        let transitioned = instance
            .registry()
            .with_state(|s| s.mark_terminated_at(idx, pid))?;
        if transitioned {
            info!(pid, "reaped terminated process");
            instance.notify_peers(EventKind::ProcessStopped, pid);
            reclaimed += 1;
        } else {
            debug!(pid, "record reclaimed concurrently");
        }
    }
    Ok(reclaimed)
}

/// Poll loop body for the reaper thread. Sleeps in short slices so a
/// shutdown request is observed well before the interval elapses.
pub fn run(instance: &Instance, flag: &ShutdownFlag) {
    let interval = instance.poll_interval();
    debug!(interval_ms = interval.as_millis() as u64, "reaper running");
    while !flag.requested() {
        if let Err(err) = scan_once(instance) {
            debug!(%err, "reap pass failed; will retry");
        }
        let deadline = Instant::now() + interval;
        while !flag.requested() && Instant::now() < deadline {
            let slice = crate::config::POLL_SLICE.min(deadline - Instant::now());
            std::thread::sleep(slice.max(Duration::from_millis(1)));
        }
    }
    debug!("reaper exiting");
}
