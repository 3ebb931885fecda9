//! Durable-state boundary with optimistic concurrency.
//!
//! The scheduler persists jobs, workflow graphs, and execution groups
//! through the [`StateStore`] trait. Every record carries a `version`
//! counter; a save whose version does not match the stored one fails
//! with [`StoreError::StaleWrite`] instead of silently clobbering a
//! concurrent writer. [`InMemoryStateStore`] is the reference backend
//! used by the tests and by embedded deployments.

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::capacity::ExecutionGroup;
use crate::graph::WorkflowJob;
use crate::job::Job;
use crate::types::{GroupId, JobId};

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("stale write for {record}: expected version {expected}, store has {found}")]
    #[diagnostic(
        code(taskweave::store::stale_write),
        help("Reload the record and reapply the change on the fresh version.")
    )]
    StaleWrite {
        record: String,
        expected: u64,
        found: u64,
    },

    #[error("record not found: {record}")]
    #[diagnostic(code(taskweave::store::not_found))]
    NotFound { record: String },

    #[error("storage backend failure: {reason}")]
    #[diagnostic(code(taskweave::store::backend))]
    Backend { reason: String },
}

/// Persistence boundary for scheduler state.
///
/// `save_*` methods take `&mut` records: on success the record's
/// `version` is bumped in place so the caller keeps writing against the
/// current version without a reload.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Jobs not yet terminal, for startup recovery.
    async fn load_active_jobs(&self) -> Result<Vec<Job>, StoreError>;

    async fn load_workflows(&self) -> Result<Vec<WorkflowJob>, StoreError>;

    async fn load_groups(&self) -> Result<Vec<ExecutionGroup>, StoreError>;

    async fn save_job(&self, job: &mut Job) -> Result<(), StoreError>;

    async fn save_workflow(&self, workflow: &mut WorkflowJob) -> Result<(), StoreError>;

    async fn save_group(&self, group: &ExecutionGroup) -> Result<(), StoreError>;
}

/// Process-local [`StateStore`] backed by hash maps.
#[derive(Default)]
pub struct InMemoryStateStore {
    jobs: Mutex<FxHashMap<JobId, Job>>,
    workflows: Mutex<FxHashMap<JobId, WorkflowJob>>,
    groups: Mutex<FxHashMap<GroupId, ExecutionGroup>>,
}

impl InMemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed execution groups before handing the store to a scheduler.
    pub fn seed_groups(&self, groups: impl IntoIterator<Item = ExecutionGroup>) {
        let mut table = self.groups.lock();
        for group in groups {
            table.insert(group.id.clone(), group);
        }
    }

    /// Direct read for tests and diagnostics.
    #[must_use]
    pub fn job(&self, id: JobId) -> Option<Job> {
        self.jobs.lock().get(&id).cloned()
    }

    #[must_use]
    pub fn workflow(&self, id: JobId) -> Option<WorkflowJob> {
        self.workflows.lock().get(&id).cloned()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load_active_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .values()
            .filter(|job| !job.status.is_terminal())
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created.cmp(&b.created));
        Ok(jobs)
    }

    async fn load_workflows(&self) -> Result<Vec<WorkflowJob>, StoreError> {
        Ok(self.workflows.lock().values().cloned().collect())
    }

    async fn load_groups(&self) -> Result<Vec<ExecutionGroup>, StoreError> {
        Ok(self.groups.lock().values().cloned().collect())
    }

    async fn save_job(&self, job: &mut Job) -> Result<(), StoreError> {
        let mut table = self.jobs.lock();
        if let Some(existing) = table.get(&job.id) {
            if existing.version != job.version {
                return Err(StoreError::StaleWrite {
                    record: format!("job {}", job.id),
                    expected: job.version,
                    found: existing.version,
                });
            }
        }
        job.version += 1;
        table.insert(job.id, job.clone());
        Ok(())
    }

    async fn save_workflow(&self, workflow: &mut WorkflowJob) -> Result<(), StoreError> {
        let mut table = self.workflows.lock();
        if let Some(existing) = table.get(&workflow.id) {
            if existing.version != workflow.version {
                return Err(StoreError::StaleWrite {
                    record: format!("workflow {}", workflow.id),
                    expected: workflow.version,
                    found: existing.version,
                });
            }
        }
        workflow.version += 1;
        table.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn save_group(&self, group: &ExecutionGroup) -> Result<(), StoreError> {
        self.groups.lock().insert(group.id.clone(), group.clone());
        Ok(())
    }
}
