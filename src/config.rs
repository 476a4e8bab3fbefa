use std::time::Duration;

pub const DEFAULT_NAMESPACE: &str = "procx";
pub const NAMESPACE_ENV: &str = "PROCX_NAMESPACE";
pub const POLL_INTERVAL_ENV: &str = "PROCX_POLL_INTERVAL_SEC";

/// Capacity of the shared process table. A deliberate safety bound, not a
/// performance shortcut; the table never grows.
pub const MAX_PROCESSES: usize = 50;
/// How many instances may coordinate concurrently.
pub const MAX_INSTANCES: usize = 2;
/// Bounded command text stored per record.
pub const COMMAND_MAX: usize = 256;

// Segment comfortably larger than the gate region plus the registry state
// (the state itself is ~14 KiB).
pub const SEGMENT_SIZE: usize = 64 * 1024;

pub const POLL_INTERVAL_DEFAULT: Duration = Duration::from_secs(3);
/// Granularity at which the reaper's sleep re-checks the shutdown flag.
pub const POLL_SLICE: Duration = Duration::from_millis(250);

pub fn namespace() -> String {
    std::env::var(NAMESPACE_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
}

pub fn poll_interval() -> Duration {
    std::env::var(POLL_INTERVAL_ENV)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(POLL_INTERVAL_DEFAULT)
}
