pub mod shared_state;

pub use shared_state::{LaunchMode, ProcessRecord, ProcessStatus, SharedRegistry, SharedState};
