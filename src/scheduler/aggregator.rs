//! Callback intake, workflow advancement, and completion rollup.
//!
//! Everything here runs inside the tick, under the scheduler lease, so
//! per-workflow evaluation is serialized by construction. Engine
//! callbacks only ever enqueue [`StatusUpdate`]s; this module applies
//! them, fails timed-out and reaped jobs, force-cancels jobs whose
//! grace expired, and rolls node outcomes up into workflow-container
//! status.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

use crate::artifacts::{propagate, record_node_artifacts};
use crate::engine::StatusUpdate;
use crate::graph::WorkflowJob;
use crate::job::Job;
use crate::resolver::{has_failed, is_workflow_done, resolve};
use crate::types::{JobId, JobKind, JobStatus, LaunchType};

use super::manager::{SchedulerError, TaskManager};

impl TaskManager {
    /// Apply every queued engine callback. Duplicate or out-of-order
    /// updates for a settled job are dropped, not errors.
    pub(super) fn drain_callbacks(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(update) = self.callback_rx.try_recv() {
            if self.apply_update(update) {
                applied += 1;
            }
        }
        applied
    }

    fn apply_update(&mut self, update: StatusUpdate) -> bool {
        let job_id = update.job_id;
        let settled = match self.jobs.get(&job_id) {
            Some(job) => job.status == update.status || job.status.is_terminal(),
            None => {
                tracing::warn!(job = %job_id, "status update for unknown job, dropped");
                return false;
            }
        };
        if settled {
            return false;
        }
        if let Err(err) = self.apply_transition(job_id, update.status) {
            tracing::warn!(job = %job_id, error = %err, "rejected status update");
            return false;
        }
        // Artifacts land only once the status machine has accepted the
        // update; a rejected update must not mutate the job record.
        if let Some(artifacts) = update.artifacts {
            if let Some(job) = self.jobs.get_mut(&job_id) {
                job.artifacts.extend(artifacts);
            }
        }
        true
    }

    /// Fail running jobs whose timeout has elapsed. The engine gets a
    /// cancel signal, but the job fails now: the timeout is owned by
    /// the scheduler, not the engine.
    pub(super) async fn enforce_timeouts(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<usize, SchedulerError> {
        let mut expired: Vec<JobId> = self
            .jobs
            .values()
            .filter(|job| job.timed_out(now))
            .map(|job| job.id)
            .collect();
        expired.sort_unstable();

        for &job_id in &expired {
            let engine = self.engine.clone();
            engine.signal_cancel(job_id).await;
            if let Some(job) = self.jobs.get_mut(&job_id) {
                job.append_explanation("Job terminated due to timeout.");
            }
            self.apply_transition(job_id, JobStatus::Failed)?;
        }
        Ok(expired.len())
    }

    /// Force-cancel jobs whose cooperative cancel grace has expired
    /// without an engine confirmation.
    pub(super) fn enforce_cancel_grace(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<usize, SchedulerError> {
        let mut expired: Vec<JobId> = self
            .cancel_deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(job_id, _)| *job_id)
            .collect();
        expired.sort_unstable();

        let mut forced = 0;
        for job_id in expired {
            self.cancel_deadlines.remove(&job_id);
            let live = self
                .jobs
                .get(&job_id)
                .map_or(false, |job| !job.status.is_terminal());
            if live {
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    job.append_explanation("Canceled by force after grace period expired.");
                }
                self.apply_transition(job_id, JobStatus::Canceled)?;
                forced += 1;
            }
        }
        Ok(forced)
    }

    /// Reap jobs stuck in `waiting` past the configured grace: the
    /// engine never acknowledged them, so their state is inconsistent
    /// and they are marked `error`.
    pub(super) fn reap_stale_waiting(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<usize, SchedulerError> {
        let grace = chrono::Duration::from_std(self.config.waiting_grace).unwrap_or(
            chrono::Duration::seconds(super::SchedulerConfig::DEFAULT_WAITING_GRACE_SECS as i64),
        );
        let mut stale: Vec<JobId> = self
            .waiting_since
            .iter()
            .filter(|(_, since)| now - **since >= grace)
            .map(|(job_id, _)| *job_id)
            .collect();
        stale.sort_unstable();

        let mut reaped = 0;
        for job_id in stale {
            self.waiting_since.remove(&job_id);
            let waiting = self
                .jobs
                .get(&job_id)
                .map_or(false, |job| job.status == JobStatus::Waiting);
            if waiting {
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    job.append_explanation("Job never received an engine acknowledgment.");
                }
                self.apply_transition(job_id, JobStatus::Error)?;
                reaped += 1;
                tracing::warn!(job = %job_id, "reaped stale waiting job");
            }
        }
        Ok(reaped)
    }

    /// Advance every workflow: record artifacts, propagate them, mark
    /// skips, spawn node jobs, and roll completed workflows up into
    /// their container status. Returns `(spawned_jobs, completed)`.
    pub(super) async fn process_workflows(&mut self) -> Result<(usize, usize), SchedulerError> {
        let mut ids: Vec<JobId> = self.workflows.keys().copied().collect();
        ids.sort_unstable();

        let mut spawned_total = 0;
        let mut completed = 0;
        for workflow_id in ids {
            let (spawned, done) = self.advance_workflow(workflow_id)?;
            spawned_total += spawned;
            if done {
                completed += 1;
            }
        }
        Ok((spawned_total, completed))
    }

    fn advance_workflow(&mut self, workflow_id: JobId) -> Result<(usize, bool), SchedulerError> {
        let container_status = self
            .jobs
            .get(&workflow_id)
            .map(|job| job.status)
            .ok_or(SchedulerError::JobNotFound {
                job_id: workflow_id,
            })?;
        let mut workflow = self
            .workflows
            .remove(&workflow_id)
            .ok_or(SchedulerError::WorkflowNotFound { workflow_id })?;

        let mut dirty = false;

        // Pull finished job output onto the originating nodes. The merge
        // is idempotent, so re-running for already-recorded nodes is
        // harmless.
        for idx in 0..workflow.graph.len() {
            let Some(job_id) = workflow.graph.node(idx).spawned_job else {
                continue;
            };
            let Some(job) = self.jobs.get(&job_id) else {
                continue;
            };
            if job.status == JobStatus::Successful && !job.artifacts.is_empty() {
                let artifacts = job.artifacts.clone();
                record_node_artifacts(&mut workflow.graph, idx, &artifacts);
                dirty = true;
            }
        }

        let statuses = self.status_snapshot();
        let status_of = |job_id: JobId| statuses.get(&job_id).copied();
        propagate(&mut workflow.graph, &status_of);

        let mut spawned = 0;
        let mut rollup = None;
        if container_status == JobStatus::Running {
            let resolution = resolve(&workflow.graph, &status_of);
            for &idx in &resolution.newly_skipped {
                workflow.graph.node_mut(idx).do_not_run = true;
                dirty = true;
            }
            for idx in resolution.ready {
                self.spawn_node_job(workflow_id, &mut workflow, idx);
                spawned += 1;
                dirty = true;
            }

            if spawned == 0 {
                // Nothing new in flight; check for completion against
                // the post-skip state.
                let statuses = self.status_snapshot();
                let status_of = |job_id: JobId| statuses.get(&job_id).copied();
                if is_workflow_done(&workflow.graph, &status_of) {
                    rollup = Some(if has_failed(&workflow.graph, &status_of) {
                        JobStatus::Failed
                    } else {
                        JobStatus::Successful
                    });
                }
            }
        }

        if dirty {
            self.dirty_workflows.insert(workflow_id);
        }
        self.workflows.insert(workflow_id, workflow);

        if let Some(status) = rollup {
            tracing::info!(workflow = %workflow_id, %status, "workflow complete");
            self.apply_transition(workflow_id, status)?;
            return Ok((spawned, true));
        }
        Ok((spawned, false))
    }

    /// Create the job for a ready node and stage its ancestor artifacts
    /// for the dispatcher.
    fn spawn_node_job(&mut self, workflow_id: JobId, workflow: &mut WorkflowJob, idx: usize) {
        let node = workflow.graph.node(idx);
        let job = Job::new(JobKind::Standalone, LaunchType::Workflow)
            .with_timeout(node.timeout_secs)
            .with_task_impact(node.task_impact)
            .with_eligible_groups(node.eligible_groups.clone());
        let job_id = job.id;

        self.job_inputs
            .insert(job_id, node.ancestor_artifacts.clone());
        tracing::info!(
            workflow = %workflow_id,
            node = %node.name,
            job = %job_id,
            "spawned node job"
        );
        workflow.graph.node_mut(idx).spawned_job = Some(job_id);
        self.jobs.insert(job_id, job);
        self.dirty_jobs.insert(job_id);
    }

    fn status_snapshot(&self) -> FxHashMap<JobId, JobStatus> {
        self.jobs
            .iter()
            .map(|(job_id, job)| (*job_id, job.status))
            .collect()
    }
}
