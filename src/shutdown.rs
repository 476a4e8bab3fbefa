//! Orderly teardown of one instance.
//!
//! The coordinator raises the shutdown flag, wakes the blocked listener,
//! settles this instance's records under a single gate hold (attached
//! children are killed and reclaimed, detached children are disowned and
//! keep running), joins the worker threads, releases the instance slot, and
//! finally destroys the shared resources if no peer remains.

use crate::bus::EventKind;
use crate::core::LaunchMode;
use crate::error::ProcxError;
use crate::instance::Instance;
use crate::platform;
use crate::signal::ShutdownFlag;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Runs the whole shutdown sequence. Idempotent with respect to the flag:
/// raising it again is harmless.
pub fn run(
    instance: &Instance,
    flag: &ShutdownFlag,
    workers: Vec<JoinHandle<()>>,
) -> Result<(), ProcxError> {
    flag.request();
    if let Err(err) = instance.bus().wake_self() {
        // The listener will still exit on queue removal or interruption.
        warn!(%err, "wake-up send failed");
    }

    let stopped = settle_records(instance)?;
    for pid in &stopped {
        instance.notify_peers(EventKind::ProcessStopped, *pid);
    }

    for worker in workers {
        if worker.join().is_err() {
            warn!("worker thread panicked during shutdown");
        }
    }

    let remaining = instance.deregister()?;
    info!(remaining, "instance slot released");

    if remaining == 0 {
        debug!("last instance out; destroying shared resources");
        if let Err(err) = instance.bus().destroy() {
            warn!(%err, "bus teardown failed");
        }
        instance.registry().unlink();
    }
    Ok(())
}

/// Settles the records this instance owns, all under one gate hold so a
/// concurrent peer sees either the pre- or the post-shutdown table. Returns
/// the pids whose records transitioned to terminated.
fn settle_records(instance: &Instance) -> Result<Vec<i32>, ProcxError> {
    let own_pid = instance.pid();
    let stopped = instance.registry().with_state(|s| {
        let owned: Vec<(i32, LaunchMode)> = s
            .snapshot()
            .iter()
            .filter(|r| r.owner() == Some(own_pid))
            .map(|r| (r.pid, r.mode()))
            .collect();

        let mut stopped = Vec::new();
        for (pid, mode) in owned {
            match mode {
                LaunchMode::Attached => {
                    platform::terminate_process(pid);
                    if s.mark_terminated_if(pid) {
                        stopped.push(pid);
                    }
                }
                LaunchMode::Detached => {
                    if let Some(idx) = s.find_by_pid(pid) {
                        s.records[idx].disown();
                        info!(pid, "detached process disowned");
                    }
                }
            }
        }
        stopped
    })?;
    Ok(stopped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    static NS_SEQ: AtomicU32 = AtomicU32::new(0);

    fn test_instance() -> Instance {
        let ns = format!(
            "procx_shut_{}_{}",
            std::process::id(),
            NS_SEQ.fetch_add(1, Ordering::SeqCst)
        );
        Instance::connect(&ns, Duration::from_millis(50)).unwrap()
    }

    #[test]
    fn detached_children_are_disowned_not_killed() {
        let instance = test_instance();
        let pid = supervisor::start(&instance, "sleep 30", LaunchMode::Detached).unwrap();

        let stopped = settle_records(&instance).unwrap();
        assert!(stopped.is_empty());

        let (owner, active) = instance
            .registry()
            .with_state(|s| {
                let idx = s.find_by_pid(pid).unwrap();
                (s.records[idx].owner(), s.records[idx].is_active())
            })
            .unwrap();
        assert_eq!(owner, None);
        assert!(active);
        assert!(platform::process_alive(pid));

        platform::terminate_process(pid);
        let _ = instance.bus().destroy();
        instance.registry().unlink();
    }

    #[test]
    fn attached_children_are_killed_and_reclaimed() {
        let instance = test_instance();
        // An attached record normally belongs to a blocked start call; model
        // one directly with a live child.
        let child = std::process::Command::new("/bin/sleep").arg("30").spawn().unwrap();
        let pid = child.id() as i32;
        instance
            .registry()
            .with_state(|s| {
                s.insert_record(pid, instance.pid(), "sleep 30", LaunchMode::Attached, Utc::now())
                    .unwrap();
            })
            .unwrap();

        let stopped = settle_records(&instance).unwrap();
        assert_eq!(stopped, vec![pid]);
        let found = instance.registry().with_state(|s| s.find_by_pid(pid)).unwrap();
        assert_eq!(found, None);

        let _ = instance.bus().destroy();
        instance.registry().unlink();
    }

    #[test]
    fn last_instance_destroys_shared_resources() {
        let instance = test_instance();
        let flag = ShutdownFlag::new();
        run(&instance, &flag, Vec::new()).unwrap();
        assert!(flag.requested());
        // The bus is gone; a further send observes removal.
        let err = instance
            .bus()
            .send_to(instance.pid(), EventKind::WakeUp, 0)
            .unwrap_err();
        assert!(matches!(err, crate::error::BusError::Removed));
    }

    #[test]
    fn run_wakes_and_joins_workers_before_teardown() {
        let instance = std::sync::Arc::new(test_instance());
        let flag = ShutdownFlag::new();
        // A worker blocked in the bus receive stands in for the listener
        // thread; run must unblock it, join it, then destroy the queue.
        let worker = {
            let instance = std::sync::Arc::clone(&instance);
            let flag = flag.clone();
            std::thread::spawn(move || crate::listener::run(&instance, &flag))
        };

        run(&instance, &flag, vec![worker]).unwrap();

        let err = instance
            .bus()
            .send_to(instance.pid(), EventKind::WakeUp, 0)
            .unwrap_err();
        assert!(matches!(err, crate::error::BusError::Removed));
    }

    #[test]
    fn surviving_peer_keeps_resources_alive() {
        let instance = test_instance();
        instance
            .registry()
            .with_state(|s| s.register_instance(instance.pid() + 1))
            .unwrap()
            .unwrap();

        let flag = ShutdownFlag::new();
        run(&instance, &flag, Vec::new()).unwrap();

        // The queue still accepts sends for the peer.
        instance
            .bus()
            .send_to(instance.pid() + 1, EventKind::WakeUp, 0)
            .unwrap();

        let _ = instance.bus().destroy();
        instance.registry().unlink();
    }
}
