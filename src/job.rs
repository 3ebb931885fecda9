//! The [`Job`] record and its status machine.
//!
//! A job is the unit of schedulable work. All job flavors (standalone,
//! sync jobs, workflow containers) share this record and its transition
//! rules; they differ only in [`JobKind`] and in how the dispatcher
//! treats them.
//!
//! # Status machine
//!
//! Transitions are monotonic: a job moves strictly forward through
//! `pending → waiting → running → terminal`, and forward jumps are legal
//! (a job whose start is rejected goes `waiting → error` without ever
//! running). [`JobStatus::Canceled`] may intercept any non-terminal
//! state. Terminal states are immutable; a transition out of one is an
//! [`JobError::InvalidTransition`], never a panic.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{GroupId, JobId, JobKind, JobStatus, LaunchType};

/// Errors raised by the job status machine.
#[derive(Debug, Error, Diagnostic)]
pub enum JobError {
    /// The requested transition violates monotonicity or terminal
    /// immutability.
    #[error("invalid status transition for job {job_id}: {from} -> {to}")]
    #[diagnostic(
        code(taskweave::job::invalid_transition),
        help("Terminal states are final; non-cancel transitions must move the lifecycle forward.")
    )]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}

/// A schedulable unit of executable work.
///
/// Construct with [`Job::new`] and the `with_*` builder methods, then
/// submit through [`TaskManager::submit_job`](crate::scheduler::TaskManager::submit_job)
/// (or let the scheduler spawn it from a workflow node).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub launch_type: LaunchType,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    /// Seconds before a running job is forcibly failed. `0` disables the
    /// timeout.
    pub timeout_secs: u64,
    /// Wall-clock seconds from start to finish, set at termination.
    pub elapsed: f64,
    /// Group the job was admitted into, set by the dispatcher.
    pub execution_group: Option<GroupId>,
    /// Groups this job may run in, in preference order. Empty means any
    /// group, evaluated in policy order.
    pub eligible_groups: Vec<GroupId>,
    /// Output data produced on completion, merged into descendant
    /// workflow nodes.
    pub artifacts: FxHashMap<String, Value>,
    /// Capacity units consumed while the job holds a reservation.
    pub task_impact: u32,
    pub controller_node: Option<String>,
    pub execution_node: Option<String>,
    /// Human-readable note recorded on failure paths (start rejection,
    /// timeout, reaping).
    pub job_explanation: String,
    /// Optimistic-concurrency version for the state store.
    pub version: u64,
}

impl Job {
    /// Create a fresh `pending` job.
    #[must_use]
    pub fn new(kind: JobKind, launch_type: LaunchType) -> Self {
        Self {
            id: JobId::new(),
            kind,
            status: JobStatus::Pending,
            launch_type,
            created: Utc::now(),
            started: None,
            finished: None,
            timeout_secs: 0,
            elapsed: 0.0,
            execution_group: None,
            eligible_groups: Vec::new(),
            artifacts: FxHashMap::default(),
            task_impact: 1,
            controller_node: None,
            execution_node: None,
            job_explanation: String::new(),
            version: 0,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    #[must_use]
    pub fn with_task_impact(mut self, task_impact: u32) -> Self {
        self.task_impact = task_impact;
        self
    }

    #[must_use]
    pub fn with_eligible_groups(mut self, groups: Vec<GroupId>) -> Self {
        self.eligible_groups = groups;
        self
    }

    /// Backdate creation, used for ordering dependency jobs ahead of the
    /// job that spawned them.
    #[must_use]
    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    /// Apply a status transition, enforcing the machine's rules.
    ///
    /// Returns the previous status on success so the caller can emit a
    /// transition event. Side effects: entering `running` stamps
    /// `started`; entering a terminal state stamps `finished` and
    /// `elapsed`.
    pub fn transition_to(&mut self, to: JobStatus) -> Result<JobStatus, JobError> {
        let from = self.status;
        let legal = if from.is_terminal() {
            false
        } else if to == JobStatus::Canceled {
            // Cancellation intercepts any non-terminal state.
            true
        } else {
            rank(to) > rank(from)
        };
        if !legal {
            return Err(JobError::InvalidTransition {
                job_id: self.id,
                from,
                to,
            });
        }

        self.status = to;
        let now = Utc::now();
        if to == JobStatus::Running && self.started.is_none() {
            self.started = Some(now);
        }
        if to.is_terminal() {
            self.finished = Some(now);
            if let Some(started) = self.started {
                self.elapsed = (now - started).num_milliseconds() as f64 / 1000.0;
            }
        }
        Ok(from)
    }

    /// Whether a nonzero timeout has elapsed for a running job.
    #[must_use]
    pub fn timed_out(&self, now: DateTime<Utc>) -> bool {
        if self.timeout_secs == 0 || self.status != JobStatus::Running {
            return false;
        }
        match self.started {
            Some(started) => (now - started).num_seconds() >= self.timeout_secs as i64,
            None => false,
        }
    }

    pub fn append_explanation(&mut self, note: &str) {
        if !self.job_explanation.is_empty() {
            self.job_explanation.push(' ');
        }
        self.job_explanation.push_str(note);
    }
}

/// Forward-progress ordering for non-cancel transitions.
fn rank(status: JobStatus) -> u8 {
    match status {
        JobStatus::Pending => 0,
        JobStatus::Waiting => 1,
        JobStatus::Running => 2,
        JobStatus::Successful | JobStatus::Failed | JobStatus::Canceled | JobStatus::Error => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_legal() {
        let mut job = Job::new(JobKind::Standalone, LaunchType::Manual);
        assert_eq!(job.transition_to(JobStatus::Waiting).unwrap(), JobStatus::Pending);
        assert_eq!(job.transition_to(JobStatus::Running).unwrap(), JobStatus::Waiting);
        assert!(job.started.is_some());
        assert_eq!(job.transition_to(JobStatus::Successful).unwrap(), JobStatus::Running);
        assert!(job.finished.is_some());
    }

    #[test]
    fn terminal_states_are_immutable() {
        let mut job = Job::new(JobKind::Standalone, LaunchType::Manual);
        job.transition_to(JobStatus::Waiting).unwrap();
        job.transition_to(JobStatus::Error).unwrap();
        let err = job.transition_to(JobStatus::Running).unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
        let err = job.transition_to(JobStatus::Canceled).unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
    }

    #[test]
    fn cancel_intercepts_any_nonterminal_state() {
        for target in [JobStatus::Pending, JobStatus::Waiting, JobStatus::Running] {
            let mut job = Job::new(JobKind::Standalone, LaunchType::Manual);
            if target != JobStatus::Pending {
                job.transition_to(JobStatus::Waiting).unwrap();
            }
            if target == JobStatus::Running {
                job.transition_to(JobStatus::Running).unwrap();
            }
            assert_eq!(job.status, target);
            job.transition_to(JobStatus::Canceled).unwrap();
            assert_eq!(job.status, JobStatus::Canceled);
        }
    }

    #[test]
    fn backward_transitions_are_rejected() {
        let mut job = Job::new(JobKind::Standalone, LaunchType::Manual);
        job.transition_to(JobStatus::Running).unwrap();
        assert!(job.transition_to(JobStatus::Pending).is_err());
        assert!(job.transition_to(JobStatus::Waiting).is_err());
    }

    #[test]
    fn timeout_detection() {
        let mut job = Job::new(JobKind::Standalone, LaunchType::Manual).with_timeout(30);
        job.transition_to(JobStatus::Running).unwrap();
        let now = Utc::now();
        assert!(!job.timed_out(now));
        assert!(job.timed_out(now + chrono::Duration::seconds(31)));

        // Zero timeout never fires.
        let mut no_timeout = Job::new(JobKind::Standalone, LaunchType::Manual);
        no_timeout.transition_to(JobStatus::Running).unwrap();
        assert!(!no_timeout.timed_out(now + chrono::Duration::days(1)));
    }
}
