//! Signal-triggered shutdown requests.
//!
//! The handler does exactly one thing: it sets an atomic flag. No blocking
//! work, no control flow. The main loop and the reaper poll the flag; the
//! blocked listener is woken separately by a self-addressed bus message.
//! `SA_RESTART` is deliberately not set so that a blocking prompt read
//! returns `EINTR` and the front end gets a chance to re-check the flag.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

static INSTALLED: OnceLock<ShutdownFlag> = OnceLock::new();

/// Cooperatively polled shutdown-requested flag.
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> ShutdownFlag {
        ShutdownFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

extern "C" fn handler(signum: libc::c_int) {
    let _ = signum;
    if let Some(flag) = INSTALLED.get() {
        flag.0.store(true, Ordering::SeqCst);
    }
}

/// Routes SIGINT, SIGHUP and SIGTERM to `flag`. Installing twice keeps the
/// first flag.
pub fn install(flag: &ShutdownFlag) -> io::Result<()> {
    let _ = INSTALLED.set(flag.clone());

    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as usize;
        let mut empty_set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut empty_set as *mut libc::sigset_t);
        action.sa_mask = empty_set;

        for signum in [libc::SIGINT, libc::SIGHUP, libc::SIGTERM] {
            if libc::sigaction(signum, &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok(())
}
