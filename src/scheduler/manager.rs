//! The scheduler context handle and its public operations.
//!
//! [`TaskManager`] owns all live scheduler state: the job table, the
//! workflow graphs, the capacity tracker, the credential registry, and
//! the event bus. All mutation funnels through `&mut self` methods, so
//! callbacks from the engine never touch state directly; they queue
//! [`StatusUpdate`]s on a channel drained at the start of the next tick.
//!
//! # Architecture
//!
//! - **`tick()`**: one pass of the control loop: drain callbacks,
//!   enforce timeouts and cancel grace, reap stale `waiting` jobs,
//!   advance workflows, dispatch pending jobs, persist what changed.
//! - **`run()`**: drives `tick()` on an interval until shutdown.
//!
//! The per-tick admission logic lives in [`super::dispatcher`], the
//! completion/failure rollup in [`super::aggregator`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::instrument;

use crate::auth::CredentialRegistry;
use crate::capacity::CapacityTracker;
use crate::engine::{ExecutionEngine, StatusUpdate};
use crate::event_bus::{Event, EventBus, EventSink};
use crate::graph::{GraphBuilder, GraphValidationError, WorkflowJob, WorkflowTemplate};
use crate::job::{Job, JobError};
use crate::store::{StateStore, StoreError};
use crate::types::{JobId, JobKind, JobStatus, LaunchType};

use super::config::SchedulerConfig;
use super::lease::SchedulerLease;

/// Errors surfaced by [`TaskManager`] operations.
#[derive(Debug, Error, Diagnostic)]
pub enum SchedulerError {
    #[error("job not found: {job_id}")]
    #[diagnostic(code(taskweave::scheduler::job_not_found))]
    JobNotFound { job_id: JobId },

    #[error("workflow not found: {workflow_id}")]
    #[diagnostic(code(taskweave::scheduler::workflow_not_found))]
    WorkflowNotFound { workflow_id: JobId },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphValidationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Job(#[from] JobError),
}

/// Counters from one pass of the control loop.
#[derive(Clone, Debug, Default)]
pub struct TickReport {
    /// `true` when the lease was held elsewhere and nothing ran.
    pub skipped: bool,
    pub callbacks_applied: usize,
    pub timed_out: usize,
    pub force_canceled: usize,
    pub reaped: usize,
    /// Workflow node jobs created this tick.
    pub spawned: usize,
    /// Jobs admitted and started this tick.
    pub dispatched: usize,
    pub workflows_completed: usize,
}

/// Capacity-aware job scheduler and workflow execution driver.
pub struct TaskManager {
    pub(super) config: SchedulerConfig,
    pub(super) engine: Arc<dyn ExecutionEngine>,
    store: Arc<dyn StateStore>,
    pub(super) capacity: CapacityTracker,
    pub(super) credentials: CredentialRegistry,
    lease: SchedulerLease,
    pub(super) jobs: FxHashMap<JobId, Job>,
    pub(super) workflows: FxHashMap<JobId, WorkflowJob>,
    /// Ancestor artifacts staged for a spawned-but-undispatched job.
    pub(super) job_inputs: FxHashMap<JobId, FxHashMap<String, Value>>,
    /// Force-fail deadlines for jobs whose cancel was signalled.
    pub(super) cancel_deadlines: FxHashMap<JobId, DateTime<Utc>>,
    /// When each `waiting` job entered that state, for the reaper.
    pub(super) waiting_since: FxHashMap<JobId, DateTime<Utc>>,
    callback_tx: flume::Sender<StatusUpdate>,
    pub(super) callback_rx: flume::Receiver<StatusUpdate>,
    pub(super) events: flume::Sender<Event>,
    bus: EventBus,
    pub(super) dirty_jobs: FxHashSet<JobId>,
    pub(super) dirty_workflows: FxHashSet<JobId>,
}

impl TaskManager {
    /// Build a scheduler over an engine, a store, and an event bus.
    ///
    /// Loads execution groups and all non-terminal jobs/workflows from
    /// the store, re-reserving capacity for jobs that were admitted
    /// before a restart.
    pub async fn new(
        config: SchedulerConfig,
        engine: Arc<dyn ExecutionEngine>,
        store: Arc<dyn StateStore>,
        bus: EventBus,
    ) -> Result<Self, SchedulerError> {
        bus.listen_for_events();
        let events = bus.get_sender();
        let groups = store.load_groups().await?;
        let (callback_tx, callback_rx) = flume::unbounded();

        let mut manager = Self {
            config,
            engine,
            store,
            capacity: CapacityTracker::new(groups),
            credentials: CredentialRegistry::new(),
            lease: SchedulerLease::new(),
            jobs: FxHashMap::default(),
            workflows: FxHashMap::default(),
            job_inputs: FxHashMap::default(),
            cancel_deadlines: FxHashMap::default(),
            waiting_since: FxHashMap::default(),
            callback_tx,
            callback_rx,
            events,
            bus,
            dirty_jobs: FxHashSet::default(),
            dirty_workflows: FxHashSet::default(),
        };
        manager.restore().await?;
        Ok(manager)
    }

    async fn restore(&mut self) -> Result<(), SchedulerError> {
        let now = Utc::now();
        for job in self.store.load_active_jobs().await? {
            if job.status.holds_capacity() && job.kind.is_dispatchable() {
                if let Some(group) = &job.execution_group {
                    if let Err(err) = self.capacity.try_reserve(group, job.task_impact) {
                        tracing::warn!(
                            job = %job.id,
                            error = %err,
                            "could not re-reserve capacity on restore"
                        );
                    }
                }
            }
            if job.status == JobStatus::Waiting {
                self.waiting_since.insert(job.id, now);
            }
            self.jobs.insert(job.id, job);
        }
        for workflow in self.store.load_workflows().await? {
            self.workflows.insert(workflow.id, workflow);
        }
        Ok(())
    }

    /// Submit a prepared job for scheduling. The job stays `pending`
    /// until a tick admits it.
    pub async fn submit_job(&mut self, mut job: Job) -> Result<JobId, SchedulerError> {
        let job_id = job.id;
        self.store.save_job(&mut job).await?;
        tracing::info!(job = %job_id, kind = %job.kind, "job submitted");
        self.jobs.insert(job_id, job);
        Ok(job_id)
    }

    /// Materialize a template and launch it as a workflow.
    ///
    /// Validation failures (cycles, unknown edge targets) reject the
    /// launch before anything is persisted. The container job goes
    /// straight to `running`; it never consumes capacity or reaches
    /// the engine.
    pub async fn launch_workflow(
        &mut self,
        template: &WorkflowTemplate,
    ) -> Result<JobId, SchedulerError> {
        let graph = GraphBuilder::from_template(template).build()?;

        let mut container = Job::new(JobKind::WorkflowContainer, LaunchType::Manual);
        let workflow_id = container.id;
        self.store.save_job(&mut container).await?;
        self.jobs.insert(workflow_id, container);
        self.apply_transition(workflow_id, JobStatus::Running)?;

        let mut workflow = WorkflowJob::new(workflow_id, template.name.clone(), graph);
        self.store.save_workflow(&mut workflow).await?;
        self.workflows.insert(workflow_id, workflow);
        tracing::info!(workflow = %workflow_id, template = %template.name, "workflow launched");
        Ok(workflow_id)
    }

    /// Cancel a job or a whole workflow.
    ///
    /// Workflow cancellation cancels every non-terminal descendant
    /// exactly once and marks all undispatched nodes `do_not_run`.
    /// Running jobs get a cooperative engine signal and a grace
    /// deadline; the tick loop force-fails them if the engine never
    /// confirms. Canceling an already-terminal job is a no-op.
    pub async fn cancel(&mut self, job_id: JobId) -> Result<(), SchedulerError> {
        if !self.jobs.contains_key(&job_id) {
            return Err(SchedulerError::JobNotFound { job_id });
        }
        if self.workflows.contains_key(&job_id) {
            self.cancel_workflow(job_id).await
        } else {
            self.cancel_job(job_id).await
        }
    }

    pub(super) async fn cancel_job(&mut self, job_id: JobId) -> Result<(), SchedulerError> {
        let status = self
            .jobs
            .get(&job_id)
            .map(|job| job.status)
            .ok_or(SchedulerError::JobNotFound { job_id })?;
        match status {
            status if status.is_terminal() => Ok(()),
            JobStatus::Running => {
                if self.cancel_deadlines.contains_key(&job_id) {
                    // Already signalled; the grace deadline stands.
                    return Ok(());
                }
                let grace = chrono::Duration::from_std(self.config.cancel_grace).unwrap_or(
                    chrono::Duration::seconds(SchedulerConfig::DEFAULT_CANCEL_GRACE_SECS as i64),
                );
                self.cancel_deadlines.insert(job_id, Utc::now() + grace);
                tracing::info!(job = %job_id, "cancel signalled, grace deadline set");
                let engine = self.engine.clone();
                engine.signal_cancel(job_id).await;
                Ok(())
            }
            // Pending and waiting jobs never reached the engine; cancel
            // immediately (the transition releases any reservation).
            _ => self.apply_transition(job_id, JobStatus::Canceled),
        }
    }

    async fn cancel_workflow(&mut self, workflow_id: JobId) -> Result<(), SchedulerError> {
        let mut workflow = self
            .workflows
            .remove(&workflow_id)
            .ok_or(SchedulerError::WorkflowNotFound { workflow_id })?;

        let mut descendants = Vec::new();
        for idx in 0..workflow.graph.len() {
            let node = workflow.graph.node_mut(idx);
            match node.spawned_job {
                Some(job_id) => descendants.push(job_id),
                None => node.do_not_run = true,
            }
        }
        self.dirty_workflows.insert(workflow_id);
        self.workflows.insert(workflow_id, workflow);

        for job_id in descendants {
            let terminal = self
                .jobs
                .get(&job_id)
                .map_or(true, |job| job.status.is_terminal());
            if !terminal {
                self.cancel_job(job_id).await?;
            }
        }

        let container_terminal = self
            .jobs
            .get(&workflow_id)
            .map_or(true, |job| job.status.is_terminal());
        if !container_terminal {
            self.apply_transition(workflow_id, JobStatus::Canceled)?;
        }
        Ok(())
    }

    /// Current status of a job, if known.
    #[must_use]
    pub fn get_status(&self, job_id: JobId) -> Option<JobStatus> {
        self.jobs.get(&job_id).map(|job| job.status)
    }

    #[must_use]
    pub fn job(&self, job_id: JobId) -> Option<&Job> {
        self.jobs.get(&job_id)
    }

    #[must_use]
    pub fn workflow(&self, workflow_id: JobId) -> Option<&WorkflowJob> {
        self.workflows.get(&workflow_id)
    }

    /// Sender the execution side uses to report [`StatusUpdate`]s.
    /// Updates are applied at the start of the next tick.
    #[must_use]
    pub fn callback_sender(&self) -> flume::Sender<StatusUpdate> {
        self.callback_tx.clone()
    }

    /// Verify a callback bearer token against live job state.
    pub fn verify_callback_token(&self, token: &str) -> Result<JobId, crate::auth::AuthError> {
        self.credentials
            .verify(token, |job_id| self.get_status(job_id))
    }

    /// Attach an additional event sink (useful for per-run observation).
    pub fn add_event_sink<T: EventSink + 'static>(&self, sink: T) {
        self.bus.add_sink(sink);
    }

    #[must_use]
    pub fn capacity(&self) -> &CapacityTracker {
        &self.capacity
    }

    /// One pass of the control loop.
    ///
    /// Skipped (with `skipped = true` in the report) when the scheduler
    /// lease is held elsewhere. Order within a tick: callbacks, then
    /// timeouts, force-cancels, and the waiting reaper, then workflow
    /// advancement, then dispatch, then persistence, so jobs spawned by
    /// a workflow this tick are eligible for admission this tick.
    #[instrument(skip(self))]
    pub async fn tick(&mut self) -> Result<TickReport, SchedulerError> {
        let Some(_guard) = self.lease.try_acquire() else {
            tracing::debug!("tick skipped: lease held elsewhere");
            return Ok(TickReport {
                skipped: true,
                ..TickReport::default()
            });
        };

        let now = Utc::now();
        let mut report = TickReport::default();
        report.callbacks_applied = self.drain_callbacks();
        report.timed_out = self.enforce_timeouts(now).await?;
        report.force_canceled = self.enforce_cancel_grace(now)?;
        report.reaped = self.reap_stale_waiting(now)?;
        let (spawned, completed) = self.process_workflows().await?;
        report.spawned = spawned;
        report.workflows_completed = completed;
        report.dispatched = self.dispatch_pending().await?;
        self.persist_dirty().await?;
        Ok(report)
    }

    /// Drive `tick()` on the configured interval until `shutdown` fires.
    pub async fn run(&mut self, mut shutdown: oneshot::Receiver<()>) -> Result<(), SchedulerError> {
        let mut interval = tokio::time::interval(self.config.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    // A failed tick (a stale write, a store hiccup) must
                    // not stop the loop; the next tick retries.
                    match self.tick().await {
                        Ok(report) if !report.skipped => {
                            tracing::trace!(?report, "tick complete");
                        }
                        Ok(_) => {}
                        Err(error) => {
                            tracing::error!(%error, "tick failed");
                        }
                    }
                }
            }
        }
        self.persist_dirty().await?;
        self.bus.stop_listener().await;
        Ok(())
    }

    /// Apply a status transition, emit its event, and handle the
    /// terminal side effects (credential revocation, reservation
    /// release, deadline cleanup).
    pub(super) fn apply_transition(
        &mut self,
        job_id: JobId,
        to: JobStatus,
    ) -> Result<(), SchedulerError> {
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(SchedulerError::JobNotFound { job_id })?;
        let from = job.transition_to(to)?;
        let kind = job.kind;
        let impact = job.task_impact;
        let group = job.execution_group.clone();

        self.dirty_jobs.insert(job_id);
        let _ = self.events.send(Event::transition(job_id, from, to));
        tracing::info!(job = %job_id, %from, %to, "status transition");

        if to.is_terminal() {
            self.credentials.revoke(job_id);
            self.waiting_since.remove(&job_id);
            self.cancel_deadlines.remove(&job_id);
            self.job_inputs.remove(&job_id);
            if from.holds_capacity() && kind.is_dispatchable() {
                if let Some(group) = group {
                    self.capacity.release(&group, impact);
                }
            }
        }
        Ok(())
    }

    /// Flush dirty jobs and workflows to the store, id-ordered.
    pub(super) async fn persist_dirty(&mut self) -> Result<(), SchedulerError> {
        let mut job_ids: Vec<JobId> = self.dirty_jobs.drain().collect();
        job_ids.sort_unstable();
        for job_id in job_ids {
            if let Some(mut job) = self.jobs.get(&job_id).cloned() {
                self.store.save_job(&mut job).await?;
                self.jobs.insert(job_id, job);
            }
        }

        let mut workflow_ids: Vec<JobId> = self.dirty_workflows.drain().collect();
        workflow_ids.sort_unstable();
        for workflow_id in workflow_ids {
            if let Some(mut workflow) = self.workflows.get(&workflow_id).cloned() {
                self.store.save_workflow(&mut workflow).await?;
                self.workflows.insert(workflow_id, workflow);
            }
        }
        Ok(())
    }
}
