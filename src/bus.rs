//! The notification bus: a System V message queue keyed per namespace.
//!
//! Delivery is addressed: the kernel filters on the message type field,
//! which carries the destination instance's pid. Sends are non-blocking and
//! best-effort (a full queue drops the notification); the receive side
//! blocks, which is why shutdown wakes a listener with a self-addressed
//! [`EventKind::WakeUp`] instead of relying on a cooperative check.

use crate::error::BusError;
use std::io;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ProcessStarted,
    ProcessStopped,
    /// Self-addressed cancellation trigger; never rendered.
    WakeUp,
}

impl EventKind {
    fn as_raw(self) -> i32 {
        match self {
            EventKind::ProcessStarted => 1,
            EventKind::ProcessStopped => 2,
            EventKind::WakeUp => 3,
        }
    }

    fn from_raw(raw: i32) -> Option<EventKind> {
        match raw {
            1 => Some(EventKind::ProcessStarted),
            2 => Some(EventKind::ProcessStopped),
            3 => Some(EventKind::WakeUp),
            _ => None,
        }
    }
}

/// One event received from a peer (or from ourselves, for the wake-up case).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub kind: EventKind,
    pub sender: i32,
    pub subject: i32,
}

/// Wire layout. The leading `mtype` is the System V type field and carries
/// the destination pid; it is not part of the payload size.
#[repr(C)]
struct WireMessage {
    mtype: libc::c_long,
    kind: i32,
    sender: i32,
    subject: i32,
}

const PAYLOAD_SIZE: usize =
    std::mem::size_of::<WireMessage>() - std::mem::size_of::<libc::c_long>();

/// Well-known queue key for a namespace (FNV-1a, masked positive).
pub fn key_for_namespace(namespace: &str) -> i32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in namespace.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    let key = (hash & 0x7fff_ffff) as i32;
    if key == 0 {
        // IPC_PRIVATE would create an anonymous queue.
        0x7072_6378 // "prcx"
    } else {
        key
    }
}

pub struct Bus {
    id: libc::c_int,
    own_pid: i32,
}

impl Bus {
    /// Opens the namespace queue, creating it if absent. Fatal to the caller
    /// if this fails; no coordination is possible without the bus.
    pub fn open_or_create(key: i32, own_pid: i32) -> Result<Bus, BusError> {
        let id = unsafe { libc::msgget(key, libc::IPC_CREAT | 0o600) };
        if id == -1 {
            return Err(BusError::Create(io::Error::last_os_error()));
        }
        Ok(Bus { id, own_pid })
    }

    /// Addressed non-blocking send.
    pub fn send_to(&self, dest: i32, kind: EventKind, subject: i32) -> Result<(), BusError> {
        let msg = WireMessage {
            mtype: dest as libc::c_long,
            kind: kind.as_raw(),
            sender: self.own_pid,
            subject,
        };
        let rc = unsafe {
            libc::msgsnd(
                self.id,
                &msg as *const WireMessage as *const libc::c_void,
                PAYLOAD_SIZE,
                libc::IPC_NOWAIT,
            )
        };
        if rc == -1 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::EAGAIN) => BusError::ChannelFull(dest),
                Some(libc::EIDRM) | Some(libc::EINVAL) => BusError::Removed,
                _ => BusError::Send(err),
            });
        }
        Ok(())
    }

    /// Broadcasts to the given peers. A full channel for one peer is a
    /// dropped notification, reported but never retried and never fatal.
    pub fn publish_to(&self, peers: &[i32], kind: EventKind, subject: i32) {
        for peer in peers {
            match self.send_to(*peer, kind, subject) {
                Ok(()) => {}
                Err(BusError::ChannelFull(dest)) => {
                    warn!(dest, ?kind, subject, "notification dropped: channel full");
                }
                Err(err) => {
                    warn!(peer, ?kind, subject, %err, "notification send failed");
                }
            }
        }
    }

    /// Blocks until a message addressed to this instance arrives.
    pub fn listen(&self) -> Result<Notification, BusError> {
        let mut msg = WireMessage {
            mtype: 0,
            kind: 0,
            sender: 0,
            subject: 0,
        };
        let rc = unsafe {
            libc::msgrcv(
                self.id,
                &mut msg as *mut WireMessage as *mut libc::c_void,
                PAYLOAD_SIZE,
                self.own_pid as libc::c_long,
                0,
            )
        };
        if rc == -1 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::EINTR) => BusError::Interrupted,
                Some(libc::EIDRM) | Some(libc::EINVAL) => BusError::Removed,
                _ => BusError::Receive(err),
            });
        }
        let kind = EventKind::from_raw(msg.kind).ok_or_else(|| {
            BusError::Receive(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown event kind {}", msg.kind),
            ))
        })?;
        Ok(Notification {
            kind,
            sender: msg.sender,
            subject: msg.subject,
        })
    }

    /// Unblocks this instance's own blocking [`listen`](Bus::listen).
    pub fn wake_self(&self) -> Result<(), BusError> {
        self.send_to(self.own_pid, EventKind::WakeUp, self.own_pid)
    }

    /// Removes the queue from the kernel. Last-instance teardown only; a
    /// peer blocked in `listen` observes [`BusError::Removed`].
    pub fn destroy(&self) -> Result<(), BusError> {
        let rc = unsafe { libc::msgctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) };
        if rc == -1 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                // Already gone.
                Some(libc::EIDRM) | Some(libc::EINVAL) => {
                    debug!("message queue already removed");
                    Ok(())
                }
                _ => Err(BusError::Send(err)),
            }
        } else {
            Ok(())
        }
    }
}
