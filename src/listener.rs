//! Background thread that prints peer lifecycle events as they arrive.
//!
//! The thread sits in a blocking receive on the bus. It exits when the
//! shutdown flag is up and a wake-up message (or a signal interruption)
//! breaks the block, or when the queue itself disappears because the last
//! peer tore it down.

use crate::bus::{EventKind, Notification};
use crate::error::BusError;
use crate::instance::Instance;
use crate::signal::ShutdownFlag;
use console::style;
use tracing::{debug, warn};

/// Human-readable rendering of a peer event.
pub fn describe(n: &Notification) -> String {
    match n.kind {
        EventKind::ProcessStarted => format!(
            "instance {} started process {}",
            style(n.sender).cyan(),
            style(n.subject).green()
        ),
        EventKind::ProcessStopped => format!(
            "instance {} stopped process {}",
            style(n.sender).cyan(),
            style(n.subject).red()
        ),
        EventKind::WakeUp => String::new(),
    }
}

pub fn run(instance: &Instance, flag: &ShutdownFlag) {
    loop {
        match instance.bus().listen() {
            Ok(n) => {
                if n.kind == EventKind::WakeUp {
                    if flag.requested() {
                        break;
                    }
                    continue;
                }
                println!("{}", describe(&n));
            }
            Err(BusError::Interrupted) => {
                if flag.requested() {
                    break;
                }
            }
            Err(BusError::Removed) => {
                debug!("bus removed; listener exiting");
                break;
            }
            Err(err) => {
                warn!(%err, "listener receive failed; exiting");
                break;
            }
        }
    }
    debug!("listener exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    static NS_SEQ: AtomicU32 = AtomicU32::new(0);

    fn test_instance() -> Instance {
        let ns = format!(
            "procx_lsn_{}_{}",
            std::process::id(),
            NS_SEQ.fetch_add(1, Ordering::SeqCst)
        );
        Instance::connect(&ns, Duration::from_millis(50)).unwrap()
    }

    #[test]
    fn describe_names_sender_and_subject() {
        let text = describe(&Notification {
            kind: EventKind::ProcessStarted,
            sender: 11,
            subject: 22,
        });
        assert!(text.contains("11"));
        assert!(text.contains("22"));
        assert!(text.contains("started"));
    }

    #[test]
    fn wake_up_with_flag_raised_ends_the_loop() {
        let instance = std::sync::Arc::new(test_instance());
        let flag = ShutdownFlag::new();
        let handle = {
            let instance = std::sync::Arc::clone(&instance);
            let flag = flag.clone();
            std::thread::spawn(move || run(&instance, &flag))
        };

        // An event arriving before shutdown is consumed without exiting.
        instance
            .bus()
            .send_to(instance.pid(), EventKind::ProcessStarted, 77)
            .unwrap();

        flag.request();
        instance.bus().wake_self().unwrap();
        handle.join().unwrap();

        let _ = instance.bus().destroy();
        instance.registry().unlink();
    }

    #[test]
    fn queue_removal_ends_the_loop() {
        let instance = std::sync::Arc::new(test_instance());
        let flag = ShutdownFlag::new();
        let handle = {
            let instance = std::sync::Arc::clone(&instance);
            let flag = flag.clone();
            std::thread::spawn(move || run(&instance, &flag))
        };
        // Give the thread a moment to block in the receive.
        std::thread::sleep(Duration::from_millis(100));
        instance.bus().destroy().unwrap();
        handle.join().unwrap();
        instance.registry().unlink();
    }
}
