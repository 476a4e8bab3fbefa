//! The shared registry segment and its cross-process gate.
//!
//! Every instance maps the same named shared-memory segment. The head of the
//! mapping holds a cross-process mutex (the gate); behind it lives the
//! `#[repr(C)]` [`SharedState`]: the fixed-capacity process table and the
//! instance-slot table. The state is never touched except through
//! [`SharedRegistry::with_state`], which holds the gate for the duration of
//! the closure.
//!
//! The segment outlives its creator (`set_owner(false)`); the last instance
//! to deregister calls [`SharedRegistry::unlink`] so the kernel object is
//! removed and a fresh instance starts from a zeroed slate.

use crate::config::{COMMAND_MAX, MAX_INSTANCES, MAX_PROCESSES, SEGMENT_SIZE};
use crate::error::RegistryError;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex as HandleMutex;
use raw_sync::locks::{LockImpl, LockInit, Mutex};
use shared_memory::{Shmem, ShmemConf, ShmemError};
use thiserror::Error;

/// Launch mode recorded for a tracked child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// The launching instance blocks until the child exits.
    Attached,
    /// The child runs in its own session and may outlive the launcher.
    Detached,
}

impl LaunchMode {
    fn from_raw(raw: u8) -> LaunchMode {
        if raw == 1 {
            LaunchMode::Detached
        } else {
            LaunchMode::Attached
        }
    }

    fn as_raw(self) -> u8 {
        match self {
            LaunchMode::Attached => 0,
            LaunchMode::Detached => 1,
        }
    }
}

impl std::fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LaunchMode::Attached => "attached",
            LaunchMode::Detached => "detached",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Terminated,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Terminated => "terminated",
        })
    }
}

/// One tracked child process. All-zero bytes are a valid (inactive) record,
/// which is what makes zero-initializing the fresh segment sufficient.
///
/// A record with `active == 0` has no other meaningful field.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ProcessRecord {
    pub pid: i32,
    owner: i32,
    command: [u8; COMMAND_MAX],
    command_len: u32,
    mode: u8,
    status: u8,
    active: u8,
    _pad: u8,
    started_at: i64,
}

impl ProcessRecord {
    pub fn is_active(&self) -> bool {
        self.active != 0
    }

    /// Owning instance, `None` once disowned.
    pub fn owner(&self) -> Option<i32> {
        if self.owner == 0 {
            None
        } else {
            Some(self.owner)
        }
    }

    pub fn mode(&self) -> LaunchMode {
        LaunchMode::from_raw(self.mode)
    }

    pub fn status(&self) -> ProcessStatus {
        if self.status == 0 {
            ProcessStatus::Running
        } else {
            ProcessStatus::Terminated
        }
    }

    pub fn command(&self) -> String {
        let len = (self.command_len as usize).min(COMMAND_MAX);
        String::from_utf8_lossy(&self.command[..len]).into_owned()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.started_at, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub(crate) fn fill(
        &mut self,
        pid: i32,
        owner: i32,
        command: &str,
        mode: LaunchMode,
        started_at: DateTime<Utc>,
    ) {
        let bytes = command.as_bytes();
        let len = bytes.len().min(COMMAND_MAX);
        self.command = [0; COMMAND_MAX];
        self.command[..len].copy_from_slice(&bytes[..len]);
        self.command_len = len as u32;
        self.pid = pid;
        self.owner = owner;
        self.mode = mode.as_raw();
        self.status = 0;
        self.started_at = started_at.timestamp();
        self.active = 1;
    }

    /// Clears the owner; the record stays active and becomes the liveness
    /// probe's responsibility.
    pub(crate) fn disown(&mut self) {
        self.owner = 0;
    }

    pub(crate) fn set_terminated(&mut self) {
        self.status = 1;
        self.active = 0;
    }
}

/// Process-wide state mapped by every instance. Mutated only under the gate.
#[repr(C)]
pub struct SharedState {
    pub records: [ProcessRecord; MAX_PROCESSES],
    pub process_count: u32,
    pub instances: [i32; MAX_INSTANCES],
    pub instance_count: u32,
}

impl SharedState {
    /// Heap-allocated zeroed state. All-zero is the valid empty registry;
    /// this is what a freshly created segment contains.
    pub fn zeroed() -> Box<SharedState> {
        // ProcessRecord and the counters are plain old data; zero bytes form
        // the canonical empty value of every field.
        Box::new(unsafe { std::mem::zeroed() })
    }
}

#[derive(Debug, Error)]
enum OpenError {
    #[error("shared memory region too small for the process registry")]
    RegionTooSmall,
    #[error("shared memory error: {0}")]
    Shmem(#[from] ShmemError),
    #[error("gate init failed: {0}")]
    GateInit(String),
}

/// Handle on the mapped registry: the gate plus the typed state pointer.
///
/// Constructed once per instance via [`SharedRegistry::open_or_create`].
pub struct SharedRegistry {
    gate: Box<dyn LockImpl>,
    state: *mut SharedState,
    // Only mutated at teardown (ownership re-take); parked behind an
    // in-process lock so `unlink` can take `&self`.
    shm: HandleMutex<Shmem>,
    namespace: String,
}

// Safety: `state` is only ever dereferenced while the cross-process gate is
// held (see `with_state`), and the mapping lives as long as `shm`. The gate
// itself serializes across threads the same way it does across processes.
unsafe impl Send for SharedRegistry {}
unsafe impl Sync for SharedRegistry {}

impl SharedRegistry {
    /// Idempotent open-or-create of the named segment. The first instance
    /// creates, zeroes and relinquishes ownership of the mapping; later
    /// instances attach to the existing one. A create/create race is
    /// resolved by falling back to open.
    pub fn open_or_create(namespace: &str) -> Result<Self, RegistryError> {
        match Self::open_existing(namespace) {
            Ok(reg) => Ok(reg),
            Err(OpenError::Shmem(ShmemError::MapOpenFailed(_)))
            | Err(OpenError::Shmem(ShmemError::LinkDoesNotExist))
            | Err(OpenError::Shmem(ShmemError::NoLinkOrOsId)) => {
                Self::create_or_retry(namespace).map_err(|err| to_registry(err, namespace))
            }
            Err(err) => Err(to_registry(err, namespace)),
        }
    }

    fn open_existing(namespace: &str) -> Result<Self, OpenError> {
        let shm = ShmemConf::new()
            .os_id(namespace)
            .size(SEGMENT_SIZE)
            .open()?;
        Self::from_shmem(shm, false, namespace)
    }

    fn create_or_retry(namespace: &str) -> Result<Self, OpenError> {
        let conf = ShmemConf::new().os_id(namespace).size(SEGMENT_SIZE);
        match conf.create() {
            Ok(mut shm) => {
                // The mapping must survive the creator's exit; teardown is
                // the last deregistering instance's job.
                let _ = shm.set_owner(false);
                Self::from_shmem(shm, true, namespace)
            }
            Err(ShmemError::MappingIdExists) => Self::open_existing(namespace),
            Err(e) => Err(OpenError::from(e)),
        }
    }

    fn from_shmem(shm: Shmem, init: bool, namespace: &str) -> Result<Self, OpenError> {
        let base = shm.as_ptr();
        let total_len = shm.len();
        let lock_region = Mutex::size_of(Some(base));
        let aligned_lock_region = (lock_region + 7) & !7;

        if total_len < aligned_lock_region + std::mem::size_of::<SharedState>() {
            return Err(OpenError::RegionTooSmall);
        }

        let state = unsafe { base.add(aligned_lock_region) } as *mut SharedState;

        let gate = if init {
            unsafe { Mutex::new(base, state as *mut u8) }
                .map_err(|e| OpenError::GateInit(e.to_string()))?
                .0
        } else {
            unsafe { Mutex::from_existing(base, state as *mut u8) }
                .map_err(|e| OpenError::GateInit(e.to_string()))?
                .0
        };

        if init {
            let guard = gate
                .lock()
                .map_err(|e| OpenError::GateInit(e.to_string()))?;
            // Zero bytes are the valid empty state for every field.
            unsafe { std::ptr::write_bytes(state, 0, 1) };
            drop(guard);
        }

        Ok(SharedRegistry {
            gate,
            state,
            shm: HandleMutex::new(shm),
            namespace: namespace.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Runs `f` on the shared state with the gate held for its whole
    /// duration. Acquisition may block indefinitely while another instance
    /// holds the gate.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut SharedState) -> R) -> Result<R, RegistryError> {
        let _guard = self
            .gate
            .lock()
            .map_err(|e| RegistryError::Gate(e.to_string()))?;
        // Safety: the gate is held; no other thread or process touches the
        // state until the guard drops. The pointer is valid while `shm` is.
        let state = unsafe { &mut *self.state };
        Ok(f(state))
    }

    /// Re-takes ownership of the mapping so that dropping this handle
    /// unlinks the kernel object. Last-instance teardown only.
    pub fn unlink(&self) {
        let _ = self.shm.lock().set_owner(true);
    }
}

fn to_registry(err: OpenError, namespace: &str) -> RegistryError {
    match err {
        OpenError::GateInit(message) => RegistryError::Gate(message),
        other => RegistryError::Init(format!("{namespace}: {other}")),
    }
}
