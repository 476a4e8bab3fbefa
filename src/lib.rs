//! procx: a cooperative multi-instance process supervisor.
//!
//! Up to two terminal instances share one namespace: a shared-memory
//! registry of launched processes (guarded by a cross-process gate) and a
//! System V message queue carrying addressed lifecycle notifications
//! between the instances. Each instance runs a reaper thread that reclaims
//! records of processes that died unobserved, and a listener thread that
//! prints peer events. The last instance out tears the shared resources
//! down.

pub mod bus;
pub mod cmdline;
pub mod config;
pub mod core;
pub mod error;
pub mod instance;
pub mod listener;
pub mod logging;
pub mod menu;
pub mod platform;
pub mod reaper;
mod registry;
pub mod shutdown;
pub mod signal;
pub mod supervisor;

pub use crate::core::{LaunchMode, ProcessRecord, ProcessStatus, SharedRegistry};
pub use bus::{Bus, EventKind, Notification};
pub use error::{ProcxError, ProcxResult};
pub use instance::Instance;
pub use signal::ShutdownFlag;
pub use supervisor::ProcessEntry;
