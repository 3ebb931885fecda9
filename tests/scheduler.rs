//! End-to-end scheduler scenarios: admission, workflows, cancellation,
//! timeouts, credentials, and recovery.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use taskweave::capacity::ExecutionGroup;
use taskweave::engine::StatusUpdate;
use taskweave::event_bus::Event;
use taskweave::graph::{NodeTemplate, WorkflowJob, WorkflowTemplate};
use taskweave::job::Job;
use taskweave::scheduler::{SchedulerConfig, TaskManager};
use taskweave::store::{InMemoryStateStore, StateStore, StoreError};
use taskweave::types::{GroupId, JobId, JobKind, JobStatus, LaunchType};
use taskweave::utils::testing::{memory_bus, ManualEngine};

fn quick_config() -> SchedulerConfig {
    SchedulerConfig::default().with_tick(Duration::from_millis(10))
}

async fn manager_with(
    groups: Vec<ExecutionGroup>,
    config: SchedulerConfig,
) -> (TaskManager, ManualEngine, Arc<InMemoryStateStore>) {
    let store = Arc::new(InMemoryStateStore::new());
    store.seed_groups(groups);
    let engine = ManualEngine::new();
    let (bus, _sink) = memory_bus();
    let manager = TaskManager::new(config, Arc::new(engine.clone()), store.clone(), bus)
        .await
        .unwrap();
    (manager, engine, store)
}

fn default_group() -> GroupId {
    GroupId::from("default")
}

/// Store wrapper that fails a scripted number of job saves.
struct FlakyStore {
    inner: InMemoryStateStore,
    save_failures: std::sync::atomic::AtomicU32,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: InMemoryStateStore::new(),
            save_failures: std::sync::atomic::AtomicU32::new(0),
        }
    }

    fn fail_next_save(&self) {
        self.save_failures
            .store(1, std::sync::atomic::Ordering::Release);
    }

    fn take_failure(&self) -> bool {
        use std::sync::atomic::Ordering;
        self.save_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl StateStore for FlakyStore {
    async fn load_active_jobs(&self) -> Result<Vec<Job>, StoreError> {
        self.inner.load_active_jobs().await
    }

    async fn load_workflows(&self) -> Result<Vec<WorkflowJob>, StoreError> {
        self.inner.load_workflows().await
    }

    async fn load_groups(&self) -> Result<Vec<ExecutionGroup>, StoreError> {
        self.inner.load_groups().await
    }

    async fn save_job(&self, job: &mut Job) -> Result<(), StoreError> {
        if self.take_failure() {
            return Err(StoreError::Backend {
                reason: "injected save failure".to_string(),
            });
        }
        self.inner.save_job(job).await
    }

    async fn save_workflow(&self, workflow: &mut WorkflowJob) -> Result<(), StoreError> {
        self.inner.save_workflow(workflow).await
    }

    async fn save_group(&self, group: &ExecutionGroup) -> Result<(), StoreError> {
        self.inner.save_group(group).await
    }
}

#[tokio::test]
async fn flagged_node_failure_runs_always_branch_but_fails_workflow() {
    let (mut manager, engine, _) =
        manager_with(vec![ExecutionGroup::new("default", 100)], quick_config()).await;
    let template = WorkflowTemplate::new("abc")
        .add_node(NodeTemplate::new("a").on_success("b"))
        .add_node(
            NodeTemplate::new("b")
                .fail_on_job_failure(true)
                .on_always("c"),
        )
        .add_node(NodeTemplate::new("c"));
    let workflow_id = manager.launch_workflow(&template).await.unwrap();
    assert_eq!(manager.get_status(workflow_id), Some(JobStatus::Running));

    manager.tick().await.unwrap();
    assert_eq!(engine.starts().len(), 1);
    let a_id = engine.starts()[0].job_id;
    manager
        .callback_sender()
        .send(StatusUpdate::new(a_id, JobStatus::Successful))
        .unwrap();

    manager.tick().await.unwrap();
    assert_eq!(engine.starts().len(), 2);
    let b_id = engine.starts()[1].job_id;
    manager
        .callback_sender()
        .send(StatusUpdate::new(b_id, JobStatus::Failed))
        .unwrap();

    // b's failure must not stop c: the always-edge fires.
    manager.tick().await.unwrap();
    assert_eq!(engine.starts().len(), 3);
    let c_id = engine.starts()[2].job_id;
    manager
        .callback_sender()
        .send(StatusUpdate::new(c_id, JobStatus::Successful))
        .unwrap();

    manager.tick().await.unwrap();
    assert_eq!(manager.get_status(c_id), Some(JobStatus::Successful));
    assert_eq!(manager.get_status(workflow_id), Some(JobStatus::Failed));
}

#[tokio::test]
async fn capacity_and_concurrency_gate_admission() {
    let (mut manager, _engine, _) = manager_with(
        vec![ExecutionGroup::new("default", 10).with_max_concurrent_jobs(2)],
        quick_config(),
    )
    .await;

    let base = chrono::Utc::now();
    let mut ids = Vec::new();
    for offset in 0..3 {
        let job = Job::new(JobKind::Standalone, LaunchType::Manual)
            .with_task_impact(4)
            .with_created(base + chrono::Duration::milliseconds(offset));
        ids.push(manager.submit_job(job).await.unwrap());
    }

    manager.tick().await.unwrap();
    assert_eq!(manager.get_status(ids[0]), Some(JobStatus::Running));
    assert_eq!(manager.get_status(ids[1]), Some(JobStatus::Running));
    // Third job needs 4 units but only 2 remain (and the group is at
    // its concurrency limit): it stays pending with no error.
    assert_eq!(manager.get_status(ids[2]), Some(JobStatus::Pending));
    let usage = manager.capacity().usage(&default_group()).unwrap();
    assert_eq!(usage.consumed, 8);
    assert_eq!(usage.running, 2);

    manager
        .callback_sender()
        .send(StatusUpdate::new(ids[0], JobStatus::Successful))
        .unwrap();
    manager.tick().await.unwrap();
    assert_eq!(manager.get_status(ids[2]), Some(JobStatus::Running));
    let usage = manager.capacity().usage(&default_group()).unwrap();
    assert_eq!(usage.consumed, 8);
}

#[tokio::test]
async fn dispatch_is_fifo_by_creation_time() {
    let (mut manager, engine, _) =
        manager_with(vec![ExecutionGroup::new("default", 100)], quick_config()).await;

    let base = chrono::Utc::now();
    // Submit in reverse creation order; dispatch must follow `created`.
    let third = manager
        .submit_job(
            Job::new(JobKind::Standalone, LaunchType::Manual)
                .with_created(base + chrono::Duration::seconds(2)),
        )
        .await
        .unwrap();
    let first = manager
        .submit_job(Job::new(JobKind::Standalone, LaunchType::Manual).with_created(base))
        .await
        .unwrap();
    let second = manager
        .submit_job(
            Job::new(JobKind::Standalone, LaunchType::Manual)
                .with_created(base + chrono::Duration::seconds(1)),
        )
        .await
        .unwrap();

    manager.tick().await.unwrap();
    let started: Vec<JobId> = engine.starts().iter().map(|r| r.job_id).collect();
    assert_eq!(started, vec![first, second, third]);
}

#[tokio::test]
async fn start_failure_rolls_back_reservation() {
    let (mut manager, engine, _) =
        manager_with(vec![ExecutionGroup::new("default", 10)], quick_config()).await;
    engine.reject_next(1);

    let rejected = manager
        .submit_job(Job::new(JobKind::Standalone, LaunchType::Manual).with_task_impact(3))
        .await
        .unwrap();
    manager.tick().await.unwrap();

    assert_eq!(manager.get_status(rejected), Some(JobStatus::Error));
    let job = manager.job(rejected).unwrap();
    assert!(job.job_explanation.contains("Start failed"));
    let usage = manager.capacity().usage(&default_group()).unwrap();
    assert_eq!(usage.consumed, 0);
    assert_eq!(usage.running, 0);

    // The rollback leaves the group fully usable.
    let next = manager
        .submit_job(Job::new(JobKind::Standalone, LaunchType::Manual))
        .await
        .unwrap();
    manager.tick().await.unwrap();
    assert_eq!(manager.get_status(next), Some(JobStatus::Running));
}

#[tokio::test]
async fn timeout_fails_job_and_signals_engine() {
    let (mut manager, engine, _) =
        manager_with(vec![ExecutionGroup::new("default", 10)], quick_config()).await;

    let job_id = manager
        .submit_job(Job::new(JobKind::Standalone, LaunchType::Manual).with_timeout(1))
        .await
        .unwrap();
    manager.tick().await.unwrap();
    assert_eq!(manager.get_status(job_id), Some(JobStatus::Running));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    manager.tick().await.unwrap();

    assert_eq!(manager.get_status(job_id), Some(JobStatus::Failed));
    assert_eq!(engine.cancels(), vec![job_id]);
    let job = manager.job(job_id).unwrap();
    assert!(job.job_explanation.contains("timeout"));
    assert_eq!(
        manager.capacity().usage(&default_group()).unwrap().consumed,
        0
    );
}

#[tokio::test]
async fn cancel_is_cooperative_then_forced_exactly_once() {
    let config = quick_config().with_cancel_grace(Duration::ZERO);
    let (mut manager, engine, _) =
        manager_with(vec![ExecutionGroup::new("default", 10)], config).await;

    let job_id = manager
        .submit_job(Job::new(JobKind::Standalone, LaunchType::Manual))
        .await
        .unwrap();
    manager.tick().await.unwrap();
    assert_eq!(manager.get_status(job_id), Some(JobStatus::Running));

    manager.cancel(job_id).await.unwrap();
    // Cooperative phase: still running, engine signalled once.
    assert_eq!(manager.get_status(job_id), Some(JobStatus::Running));
    manager.cancel(job_id).await.unwrap();
    assert_eq!(engine.cancels(), vec![job_id]);

    // Grace of zero: the next tick force-cancels.
    manager.tick().await.unwrap();
    assert_eq!(manager.get_status(job_id), Some(JobStatus::Canceled));

    // Canceling a settled job is a no-op.
    manager.cancel(job_id).await.unwrap();
    assert_eq!(engine.cancels(), vec![job_id]);
}

#[tokio::test]
async fn workflow_cancel_skips_undispatched_nodes() {
    let (mut manager, engine, _) =
        manager_with(vec![ExecutionGroup::new("default", 10)], quick_config()).await;
    let template = WorkflowTemplate::new("two-step")
        .add_node(NodeTemplate::new("a").on_success("b"))
        .add_node(NodeTemplate::new("b"));
    let workflow_id = manager.launch_workflow(&template).await.unwrap();
    manager.tick().await.unwrap();
    let a_id = engine.starts()[0].job_id;

    manager.cancel(workflow_id).await.unwrap();
    assert_eq!(manager.get_status(workflow_id), Some(JobStatus::Canceled));
    assert_eq!(engine.cancels(), vec![a_id]);
    assert!(manager.workflow(workflow_id).unwrap().graph.node(1).do_not_run);

    // Engine confirms the descendant cancel; no new work is spawned.
    manager
        .callback_sender()
        .send(StatusUpdate::new(a_id, JobStatus::Canceled))
        .unwrap();
    manager.tick().await.unwrap();
    assert_eq!(manager.get_status(a_id), Some(JobStatus::Canceled));
    assert_eq!(engine.starts().len(), 1);
}

#[tokio::test]
async fn artifacts_reach_descendant_start_requests() {
    let (mut manager, engine, _) =
        manager_with(vec![ExecutionGroup::new("default", 10)], quick_config()).await;
    let template = WorkflowTemplate::new("pipeline")
        .add_node(NodeTemplate::new("build").on_success("deploy"))
        .add_node(NodeTemplate::new("deploy"));
    manager.launch_workflow(&template).await.unwrap();
    manager.tick().await.unwrap();

    let build_id = engine.starts()[0].job_id;
    let mut artifacts = rustc_hash::FxHashMap::default();
    artifacts.insert("image".to_string(), json!("registry/app:42"));
    manager
        .callback_sender()
        .send(StatusUpdate::new(build_id, JobStatus::Successful).with_artifacts(artifacts))
        .unwrap();

    manager.tick().await.unwrap();
    assert_eq!(engine.starts().len(), 2);
    let deploy_request = &engine.starts()[1];
    assert_eq!(
        deploy_request.ancestor_artifacts.get("image"),
        Some(&json!("registry/app:42"))
    );
}

#[tokio::test]
async fn callback_credentials_expire_at_termination() {
    let (mut manager, engine, _) =
        manager_with(vec![ExecutionGroup::new("default", 10)], quick_config()).await;
    let job_id = manager
        .submit_job(Job::new(JobKind::Standalone, LaunchType::Manual))
        .await
        .unwrap();
    manager.tick().await.unwrap();

    let token = engine.starts()[0].callback_token.clone();
    assert_eq!(manager.verify_callback_token(&token).unwrap(), job_id);

    manager
        .callback_sender()
        .send(StatusUpdate::new(job_id, JobStatus::Successful))
        .unwrap();
    manager.tick().await.unwrap();
    assert!(manager.verify_callback_token(&token).is_err());
}

#[tokio::test]
async fn restore_rereserves_capacity_and_reaper_clears_stale_waiting() {
    let store = Arc::new(InMemoryStateStore::new());
    store.seed_groups([ExecutionGroup::new("default", 10)]);

    let mut stuck = Job::new(JobKind::Standalone, LaunchType::Manual).with_task_impact(2);
    stuck.transition_to(JobStatus::Waiting).unwrap();
    stuck.execution_group = Some(default_group());
    let stuck_id = stuck.id;
    store.save_job(&mut stuck).await.unwrap();

    let config = quick_config().with_waiting_grace(Duration::ZERO);
    let (bus, _sink) = memory_bus();
    let mut manager = TaskManager::new(config, Arc::new(ManualEngine::new()), store, bus)
        .await
        .unwrap();

    // Restore re-reserved the admitted job's capacity.
    assert_eq!(
        manager.capacity().usage(&default_group()).unwrap().consumed,
        2
    );

    manager.tick().await.unwrap();
    assert_eq!(manager.get_status(stuck_id), Some(JobStatus::Error));
    let job = manager.job(stuck_id).unwrap();
    assert!(job.job_explanation.contains("acknowledgment"));
    assert_eq!(
        manager.capacity().usage(&default_group()).unwrap().consumed,
        0
    );
}

#[tokio::test]
async fn every_transition_emits_one_event() {
    let store = Arc::new(InMemoryStateStore::new());
    store.seed_groups([ExecutionGroup::new("default", 10)]);
    let engine = ManualEngine::new();
    let (bus, sink) = memory_bus();
    let mut manager = TaskManager::new(
        quick_config(),
        Arc::new(engine.clone()),
        store,
        bus,
    )
    .await
    .unwrap();

    let job_id = manager
        .submit_job(Job::new(JobKind::Standalone, LaunchType::Manual))
        .await
        .unwrap();
    manager.tick().await.unwrap();
    manager
        .callback_sender()
        .send(StatusUpdate::new(job_id, JobStatus::Successful))
        .unwrap();
    manager.tick().await.unwrap();

    // Give the bus listener a moment to drain into the sink.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let transitions: Vec<(JobStatus, JobStatus)> = sink
        .snapshot()
        .into_iter()
        .filter_map(|event| match event {
            Event::Transition(t) if t.job_id == job_id => Some((t.from, t.to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (JobStatus::Pending, JobStatus::Waiting),
            (JobStatus::Waiting, JobStatus::Running),
            (JobStatus::Running, JobStatus::Successful),
        ]
    );
}

#[tokio::test]
async fn rejected_status_update_leaves_job_untouched() {
    let (mut manager, _engine, _) =
        manager_with(vec![ExecutionGroup::new("default", 10)], quick_config()).await;
    let job_id = manager
        .submit_job(Job::new(JobKind::Standalone, LaunchType::Manual))
        .await
        .unwrap();
    manager.tick().await.unwrap();
    assert_eq!(manager.get_status(job_id), Some(JobStatus::Running));

    // A backward update must not smuggle artifacts onto the record.
    let mut artifacts = rustc_hash::FxHashMap::default();
    artifacts.insert("poison".to_string(), json!("should not land"));
    manager
        .callback_sender()
        .send(StatusUpdate::new(job_id, JobStatus::Waiting).with_artifacts(artifacts))
        .unwrap();
    manager.tick().await.unwrap();

    assert_eq!(manager.get_status(job_id), Some(JobStatus::Running));
    assert!(manager.job(job_id).unwrap().artifacts.is_empty());
}

#[tokio::test]
async fn run_loop_survives_a_failing_tick() {
    let store = Arc::new(FlakyStore::new());
    store.inner.seed_groups([ExecutionGroup::new("default", 10)]);
    let engine = ManualEngine::new();
    let (bus, _sink) = memory_bus();
    let mut manager = TaskManager::new(
        quick_config(),
        Arc::new(engine.clone()),
        store.clone(),
        bus,
    )
    .await
    .unwrap();

    let job_id = manager
        .submit_job(Job::new(JobKind::Standalone, LaunchType::Manual))
        .await
        .unwrap();
    let callbacks = manager.callback_sender();

    // The first tick's persist fails; the loop must keep ticking.
    store.fail_next_save();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let handle = tokio::spawn(async move { manager.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.starts().len(), 1);
    callbacks
        .send(StatusUpdate::new(job_id, JobStatus::Successful))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let _ = shutdown_tx.send(());
    handle.await.unwrap().unwrap();
    // The job completed on a later tick and its final state was saved.
    assert!(store.inner.load_active_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn cycle_rejection_persists_nothing() {
    let (mut manager, _engine, store) =
        manager_with(vec![ExecutionGroup::new("default", 10)], quick_config()).await;
    let template = WorkflowTemplate::new("loop")
        .add_node(NodeTemplate::new("a").on_success("b"))
        .add_node(NodeTemplate::new("b").on_always("a"));
    assert!(manager.launch_workflow(&template).await.is_err());
    assert!(store.load_workflows().await.unwrap().is_empty());
    assert!(store.load_active_jobs().await.unwrap().is_empty());
}
