//! Capacity accounting for execution groups.
//!
//! The [`CapacityTracker`] is the single contended resource inside a
//! scheduler tick. Admission checks capacity and concurrency together
//! and reserves in the same locked section, so two jobs can never both
//! "fit" into the last unit of capacity: a reservation that loses the
//! race simply fails and the candidate is retried against the next
//! group or next tick.

use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::GroupId;

/// A pool of execution nodes with finite capacity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionGroup {
    pub id: GroupId,
    /// Total capacity units (e.g. available execution slots).
    pub capacity: u32,
    /// Concurrent-job ceiling; `0` means unbounded.
    pub max_concurrent_jobs: u32,
    /// Ordering used when a job is eligible for multiple groups; lower
    /// positions are tried first.
    pub policy_position: u32,
}

impl ExecutionGroup {
    pub fn new(id: impl Into<GroupId>, capacity: u32) -> Self {
        Self {
            id: id.into(),
            capacity,
            max_concurrent_jobs: 0,
            policy_position: 0,
        }
    }

    #[must_use]
    pub fn with_max_concurrent_jobs(mut self, max: u32) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    #[must_use]
    pub fn with_policy_position(mut self, position: u32) -> Self {
        self.policy_position = position;
        self
    }
}

/// Why a reservation was refused. Both variants are transient: the job
/// stays `pending` and is retried every tick, never surfaced to the
/// user except through its own timeout.
#[derive(Debug, Error, Diagnostic)]
pub enum CapacityError {
    #[error("unknown execution group: {group}")]
    #[diagnostic(code(taskweave::capacity::unknown_group))]
    UnknownGroup { group: GroupId },

    #[error("group {group} has {remaining} capacity units free, job needs {needed}")]
    #[diagnostic(code(taskweave::capacity::insufficient))]
    Insufficient {
        group: GroupId,
        needed: u32,
        remaining: u32,
    },

    #[error("group {group} is at its concurrency limit ({running}/{max})")]
    #[diagnostic(code(taskweave::capacity::concurrency_limit))]
    ConcurrencyLimit {
        group: GroupId,
        running: u32,
        max: u32,
    },
}

#[derive(Clone, Debug)]
struct GroupState {
    group: ExecutionGroup,
    consumed: u32,
    running: u32,
}

/// Point-in-time usage of one group, for logging and tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupUsage {
    pub id: GroupId,
    pub capacity: u32,
    pub consumed: u32,
    pub running: u32,
    pub max_concurrent_jobs: u32,
}

/// Process-wide capacity table, initialized from the state store at
/// scheduler startup and mutated only by the dispatcher.
pub struct CapacityTracker {
    groups: Mutex<FxHashMap<GroupId, GroupState>>,
}

impl CapacityTracker {
    pub fn new(groups: impl IntoIterator<Item = ExecutionGroup>) -> Self {
        let table = groups
            .into_iter()
            .map(|group| {
                (
                    group.id.clone(),
                    GroupState {
                        group,
                        consumed: 0,
                        running: 0,
                    },
                )
            })
            .collect();
        Self {
            groups: Mutex::new(table),
        }
    }

    /// Atomically check both admission constraints and reserve.
    ///
    /// Admission requires `consumed + impact <= capacity` AND
    /// `running < max_concurrent_jobs` (the second check is skipped
    /// when the limit is `0`). Check and increment happen under one
    /// lock acquisition.
    pub fn try_reserve(&self, group_id: &GroupId, impact: u32) -> Result<(), CapacityError> {
        let mut table = self.groups.lock();
        let state = table
            .get_mut(group_id)
            .ok_or_else(|| CapacityError::UnknownGroup {
                group: group_id.clone(),
            })?;

        // Compare against the free units rather than summing, so an
        // oversized impact cannot wrap the arithmetic.
        let remaining = state.group.capacity.saturating_sub(state.consumed);
        if impact > remaining {
            return Err(CapacityError::Insufficient {
                group: group_id.clone(),
                needed: impact,
                remaining,
            });
        }
        let max = state.group.max_concurrent_jobs;
        if max > 0 && state.running >= max {
            return Err(CapacityError::ConcurrencyLimit {
                group: group_id.clone(),
                running: state.running,
                max,
            });
        }

        state.consumed += impact;
        state.running += 1;
        tracing::debug!(
            group = %group_id,
            impact,
            consumed = state.consumed,
            capacity = state.group.capacity,
            running = state.running,
            "reserved capacity"
        );
        Ok(())
    }

    /// Release a previous reservation (job finished, was reaped, or its
    /// start was rolled back).
    pub fn release(&self, group_id: &GroupId, impact: u32) {
        let mut table = self.groups.lock();
        if let Some(state) = table.get_mut(group_id) {
            state.consumed = state.consumed.saturating_sub(impact);
            state.running = state.running.saturating_sub(1);
            tracing::debug!(
                group = %group_id,
                impact,
                consumed = state.consumed,
                running = state.running,
                "released capacity"
            );
        }
    }

    /// Remaining capacity units, or `None` for an unknown group.
    #[must_use]
    pub fn remaining(&self, group_id: &GroupId) -> Option<u32> {
        self.groups
            .lock()
            .get(group_id)
            .map(|s| s.group.capacity.saturating_sub(s.consumed))
    }

    /// Group ids ordered by policy position (ties by name, stable).
    #[must_use]
    pub fn groups_by_policy(&self) -> Vec<GroupId> {
        let table = self.groups.lock();
        let mut groups: Vec<_> = table.values().map(|s| s.group.clone()).collect();
        groups.sort_by(|a, b| {
            a.policy_position
                .cmp(&b.policy_position)
                .then_with(|| a.id.cmp(&b.id))
        });
        groups.into_iter().map(|g| g.id).collect()
    }

    #[must_use]
    pub fn usage(&self, group_id: &GroupId) -> Option<GroupUsage> {
        self.groups.lock().get(group_id).map(|s| GroupUsage {
            id: s.group.id.clone(),
            capacity: s.group.capacity,
            consumed: s.consumed,
            running: s.running,
            max_concurrent_jobs: s.group.max_concurrent_jobs,
        })
    }

    /// Usage for every group, policy-ordered.
    #[must_use]
    pub fn snapshot(&self) -> Vec<GroupUsage> {
        self.groups_by_policy()
            .iter()
            .filter_map(|id| self.usage(id))
            .collect()
    }
}
