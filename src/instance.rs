//! Terminal membership: one running copy of the program, bound to a slot in
//! the shared instance table, holding its private handles to the registry
//! and the notification bus.

use crate::bus::{key_for_namespace, Bus, EventKind};
use crate::config::MAX_INSTANCES;
use crate::core::SharedRegistry;
use crate::error::{MembershipError, ProcxError, RegistryError};
use crate::platform;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct Instance {
    registry: Arc<SharedRegistry>,
    bus: Bus,
    pid: i32,
    poll_interval: Duration,
}

impl Instance {
    /// Opens (or creates) the shared registry and the bus, then claims an
    /// instance slot. A `Rejected` result means all slots are occupied by
    /// other instances; the caller has no useful work to do and must exit.
    /// Nothing is left behind on failure: the slot is only claimed last.
    pub fn connect(namespace: &str, poll_interval: Duration) -> Result<Instance, ProcxError> {
        let pid = platform::current_pid();
        let registry = Arc::new(SharedRegistry::open_or_create(namespace)?);
        let bus = Bus::open_or_create(key_for_namespace(namespace), pid)?;

        registry.with_state(|s| s.register_instance(pid))??;
        info!(pid, namespace, "instance slot claimed (max {MAX_INSTANCES})");

        Ok(Instance {
            registry,
            bus,
            pid,
            poll_interval,
        })
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Pids of the other occupied instance slots, snapshotted under the gate.
    pub fn peers(&self) -> Result<Vec<i32>, RegistryError> {
        self.registry.with_state(|s| s.peer_instances(self.pid))
    }

    /// Best-effort lifecycle broadcast to every peer. The registry, not the
    /// notification stream, is the source of truth; failures are logged and
    /// dropped.
    pub fn notify_peers(&self, kind: EventKind, subject: i32) {
        match self.peers() {
            Ok(peers) => self.bus.publish_to(&peers, kind, subject),
            Err(err) => warn!(%err, ?kind, subject, "peer snapshot failed; notification skipped"),
        }
    }

    /// Releases this instance's slot; returns the number of instances left.
    pub fn deregister(&self) -> Result<u32, RegistryError> {
        self.registry.with_state(|s| s.deregister_instance(self.pid))
    }
}
