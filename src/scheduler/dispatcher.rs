//! Per-tick admission of pending jobs.
//!
//! Candidates are considered strictly FIFO by creation time. For each
//! candidate the eligible groups are tried in order (the job's own
//! preference list, or every group in policy order); the first group
//! with both capacity and concurrency headroom wins the reservation.
//! A job no group can admit simply stays `pending` and is retried next
//! tick; there is no backoff and no starvation of later jobs by an
//! oversized head-of-line job in a different group.

use chrono::Utc;

use crate::engine::StartRequest;
use crate::types::{GroupId, JobId, JobStatus};
use crate::utils::collections::fifo_order;

use super::manager::{SchedulerError, TaskManager};

impl TaskManager {
    /// Admit and start as many pending jobs as capacity allows.
    /// Returns the number of jobs that reached the engine.
    pub(super) async fn dispatch_pending(&mut self) -> Result<usize, SchedulerError> {
        let candidates = fifo_order(
            self.jobs
                .values()
                .filter(|job| job.status == JobStatus::Pending && job.kind.is_dispatchable()),
        );
        let mut dispatched = 0;
        for job_id in candidates {
            if self.try_dispatch(job_id).await? {
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    /// Try every eligible group for one job. `Ok(false)` means no group
    /// admitted it (or its start was rejected); the job keeps its
    /// current status either way.
    async fn try_dispatch(&mut self, job_id: JobId) -> Result<bool, SchedulerError> {
        let (impact, candidates) = {
            let job = self
                .jobs
                .get(&job_id)
                .ok_or(SchedulerError::JobNotFound { job_id })?;
            let candidates = if job.eligible_groups.is_empty() {
                self.capacity.groups_by_policy()
            } else {
                job.eligible_groups.clone()
            };
            (job.task_impact, candidates)
        };

        for group in candidates {
            match self.capacity.try_reserve(&group, impact) {
                Ok(()) => return self.start_on(job_id, group).await,
                Err(err) => {
                    tracing::debug!(job = %job_id, group = %group, error = %err, "admission refused");
                }
            }
        }
        Ok(false)
    }

    /// Drive an admitted job through `waiting` into `running`, or roll
    /// the admission back on a start failure.
    async fn start_on(&mut self, job_id: JobId, group: GroupId) -> Result<bool, SchedulerError> {
        let token = self.credentials.issue(job_id);
        let inputs = self.job_inputs.remove(&job_id).unwrap_or_default();
        let request = {
            let job = self
                .jobs
                .get_mut(&job_id)
                .ok_or(SchedulerError::JobNotFound { job_id })?;
            job.execution_group = Some(group.clone());
            StartRequest {
                job_id,
                kind: job.kind,
                execution_group: group,
                task_impact: job.task_impact,
                timeout_secs: job.timeout_secs,
                ancestor_artifacts: inputs,
                callback_token: token,
            }
        };
        self.apply_transition(job_id, JobStatus::Waiting)?;
        self.waiting_since.insert(job_id, Utc::now());

        let engine = self.engine.clone();
        match engine.start(request).await {
            Ok(handle) => {
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    job.execution_node = handle.execution_node;
                }
                self.waiting_since.remove(&job_id);
                self.apply_transition(job_id, JobStatus::Running)?;
                Ok(true)
            }
            Err(err) => {
                tracing::warn!(job = %job_id, error = %err, "engine start failed, rolling back");
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    job.append_explanation(&format!("Start failed: {err}."));
                }
                // The terminal transition revokes the credential and
                // releases the reservation.
                self.apply_transition(job_id, JobStatus::Error)?;
                Ok(false)
            }
        }
    }
}
