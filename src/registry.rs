//! Registry operations over [`SharedState`].
//!
//! Every method here assumes the gate is held for its whole duration, which
//! [`SharedRegistry::with_state`](crate::core::SharedRegistry::with_state)
//! guarantees. Slots are index-addressed with no compaction: a freed slot is
//! simply marked inactive and picked up by the next linear scan.

use crate::config::{MAX_INSTANCES, MAX_PROCESSES};
use crate::core::SharedState;
use crate::error::{MembershipError, RegistryError};
use crate::core::shared_state::LaunchMode;
use chrono::{DateTime, Utc};

impl SharedState {
    /// Inserts a new running record into the first inactive slot.
    pub fn insert_record(
        &mut self,
        pid: i32,
        owner: i32,
        command: &str,
        mode: LaunchMode,
        started_at: DateTime<Utc>,
    ) -> Result<usize, RegistryError> {
        let idx = self
            .records
            .iter()
            .position(|r| !r.is_active())
            .ok_or(RegistryError::Full(MAX_PROCESSES))?;
        self.records[idx].fill(pid, owner, command, mode, started_at);
        self.process_count += 1;
        Ok(idx)
    }

    /// Index of the active record for `pid`, if any.
    pub fn find_by_pid(&self, pid: i32) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.is_active() && r.pid == pid)
    }

    /// Marks the active record for `pid` terminated; returns whether this
    /// call performed the transition. For callers holding a slot index from
    /// an earlier snapshot, [`mark_terminated_at`](Self::mark_terminated_at)
    /// is the stricter form.
    pub fn mark_terminated_if(&mut self, pid: i32) -> bool {
        match self.find_by_pid(pid) {
            Some(idx) => self.mark_terminated_at(idx, pid),
            None => false,
        }
    }

    /// Marks slot `idx` terminated only if it is still active and still
    /// holds `pid`. Callers that classified a pid as dead without the gate
    /// held must go through this so a stale classification never corrupts a
    /// newer record: between the snapshot and the commit the slot may have
    /// been stopped, freed, and reused for a different process (including,
    /// in theory, a recycled pid in a different slot).
    pub fn mark_terminated_at(&mut self, idx: usize, pid: i32) -> bool {
        let Some(record) = self.records.get_mut(idx) else {
            return false;
        };
        if !record.is_active() || record.pid != pid {
            return false;
        }
        record.set_terminated();
        self.process_count = self.process_count.saturating_sub(1);
        true
    }

    /// Count of slots with the active flag set. Must always equal
    /// `process_count`.
    pub fn active_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_active()).count()
    }

    /// Copies of all active records, oldest slot first.
    pub fn snapshot(&self) -> Vec<crate::core::ProcessRecord> {
        self.records
            .iter()
            .filter(|r| r.is_active())
            .copied()
            .collect()
    }

    /// Claims an instance slot for `pid`. Re-registration by an already
    /// registered pid is idempotent and leaves the table unchanged.
    pub fn register_instance(&mut self, pid: i32) -> Result<(), MembershipError> {
        if self.instances.iter().any(|slot| *slot == pid) {
            return Ok(());
        }
        match self.instances.iter().position(|slot| *slot == 0) {
            Some(idx) => {
                self.instances[idx] = pid;
                self.instance_count += 1;
                Ok(())
            }
            None => Err(MembershipError::Rejected(MAX_INSTANCES)),
        }
    }

    /// Clears the caller's slot if present and returns the count after
    /// removal; `0` means the caller was the last instance.
    pub fn deregister_instance(&mut self, pid: i32) -> u32 {
        if let Some(idx) = self.instances.iter().position(|slot| *slot == pid) {
            self.instances[idx] = 0;
            self.instance_count = self.instance_count.saturating_sub(1);
        }
        self.instance_count
    }

    /// Pids of all occupied instance slots other than the caller's.
    pub fn peer_instances(&self, pid: i32) -> Vec<i32> {
        self.instances
            .iter()
            .copied()
            .filter(|slot| *slot != 0 && *slot != pid)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared_state::ProcessStatus;

    #[test]
    fn allocation_scans_for_first_inactive_slot() {
        let mut state = SharedState::zeroed();
        let now = Utc::now();
        let a = state
            .insert_record(10, 1, "sleep 1", LaunchMode::Attached, now)
            .unwrap();
        let b = state
            .insert_record(11, 1, "sleep 2", LaunchMode::Detached, now)
            .unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(state.process_count, 2);
        assert_eq!(state.active_count(), 2);

        // Freeing the first slot makes it eligible again regardless of
        // position.
        assert!(state.mark_terminated_if(10));
        let c = state
            .insert_record(12, 1, "sleep 3", LaunchMode::Attached, now)
            .unwrap();
        assert_eq!(c, 0);
        assert_eq!(state.process_count as usize, state.active_count());
    }

    #[test]
    fn table_full_is_reported() {
        let mut state = SharedState::zeroed();
        let now = Utc::now();
        for i in 0..MAX_PROCESSES {
            state
                .insert_record(1000 + i as i32, 1, "true", LaunchMode::Detached, now)
                .unwrap();
        }
        let err = state
            .insert_record(9999, 1, "true", LaunchMode::Detached, now)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Full(n) if n == MAX_PROCESSES));
        assert_eq!(state.active_count(), MAX_PROCESSES);
    }

    #[test]
    fn mark_terminated_is_exactly_once() {
        let mut state = SharedState::zeroed();
        state
            .insert_record(77, 1, "true", LaunchMode::Attached, Utc::now())
            .unwrap();
        assert!(state.mark_terminated_if(77));
        // Second caller observes the record as gone.
        assert!(!state.mark_terminated_if(77));
        assert_eq!(state.process_count, 0);
        assert_eq!(state.records[0].status(), ProcessStatus::Terminated);
    }

    #[test]
    fn stale_index_does_not_touch_a_reused_slot() {
        let mut state = SharedState::zeroed();
        let now = Utc::now();
        let idx = state
            .insert_record(10, 1, "true", LaunchMode::Detached, now)
            .unwrap();
        assert!(state.mark_terminated_at(idx, 10));

        // The freed slot is reused by a different process; the old
        // (index, pid) pair no longer matches and must be rejected.
        let reused = state
            .insert_record(20, 1, "true", LaunchMode::Detached, now)
            .unwrap();
        assert_eq!(reused, idx);
        assert!(!state.mark_terminated_at(idx, 10));
        assert_eq!(state.find_by_pid(20), Some(idx));
        assert_eq!(state.process_count, 1);

        // Out-of-range index is a no-op.
        assert!(!state.mark_terminated_at(MAX_PROCESSES, 20));
    }

    #[test]
    fn find_ignores_inactive_records() {
        let mut state = SharedState::zeroed();
        state
            .insert_record(55, 1, "true", LaunchMode::Attached, Utc::now())
            .unwrap();
        assert_eq!(state.find_by_pid(55), Some(0));
        state.mark_terminated_if(55);
        assert_eq!(state.find_by_pid(55), None);
    }

    #[test]
    fn instance_registration_is_idempotent() {
        let mut state = SharedState::zeroed();
        state.register_instance(100).unwrap();
        let before = state.instances;
        state.register_instance(100).unwrap();
        assert_eq!(state.instances, before);
        assert_eq!(state.instance_count, 1);
    }

    #[test]
    fn instance_capacity_rejects_without_mutation() {
        let mut state = SharedState::zeroed();
        state.register_instance(100).unwrap();
        state.register_instance(101).unwrap();
        let instances_before = state.instances;
        let count_before = state.instance_count;
        let err = state.register_instance(102).unwrap_err();
        assert!(matches!(err, MembershipError::Rejected(n) if n == MAX_INSTANCES));
        assert_eq!(state.instances, instances_before);
        assert_eq!(state.instance_count, count_before);
    }

    #[test]
    fn deregister_returns_remaining_count() {
        let mut state = SharedState::zeroed();
        state.register_instance(100).unwrap();
        state.register_instance(101).unwrap();
        assert_eq!(state.deregister_instance(100), 1);
        assert_eq!(state.deregister_instance(101), 0);
        // Unknown pid is a no-op.
        assert_eq!(state.deregister_instance(555), 0);
    }

    #[test]
    fn peers_exclude_self_and_empty_slots() {
        let mut state = SharedState::zeroed();
        state.register_instance(100).unwrap();
        state.register_instance(101).unwrap();
        assert_eq!(state.peer_instances(100), vec![101]);
        state.deregister_instance(101);
        assert!(state.peer_instances(100).is_empty());
    }
}
