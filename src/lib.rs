//! # Taskweave: Capacity-aware Job Scheduling and Workflow Execution
//!
//! Taskweave is a capacity-aware job scheduler and workflow-DAG
//! execution driver: it resolves dependencies between workflow nodes,
//! accounts for execution-group capacity, dispatches admitted jobs to
//! an external execution engine, propagates artifacts along fired
//! edges, and rolls node outcomes up into workflow status.
//!
//! ## Core Concepts
//!
//! - **Jobs**: Schedulable units of work with a monotonic status machine
//! - **Workflows**: Acyclic graphs of nodes whose edges fire on success,
//!   failure, or always
//! - **Execution groups**: Capacity- and concurrency-bounded pools jobs
//!   are admitted into
//! - **Ticks**: One pass of the control loop: callbacks, timeouts,
//!   workflow advancement, dispatch
//! - **Engine**: External executor consumed through a trait; it reports
//!   progress back over a callback channel
//!
//! ## Quick Start
//!
//! ### Launching a Workflow
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskweave::capacity::ExecutionGroup;
//! use taskweave::event_bus::EventBus;
//! use taskweave::graph::{NodeTemplate, WorkflowTemplate};
//! use taskweave::scheduler::{SchedulerConfig, TaskManager};
//! use taskweave::store::InMemoryStateStore;
//! use taskweave::utils::testing::ManualEngine;
//!
//! # async fn example() -> Result<(), taskweave::scheduler::SchedulerError> {
//! let store = Arc::new(InMemoryStateStore::new());
//! store.seed_groups([ExecutionGroup::new("default", 100)]);
//!
//! let mut manager = TaskManager::new(
//!     SchedulerConfig::from_env(),
//!     Arc::new(ManualEngine::new()),
//!     store,
//!     EventBus::default(),
//! )
//! .await?;
//!
//! let template = WorkflowTemplate::new("deploy")
//!     .add_node(NodeTemplate::new("sync").on_success("provision"))
//!     .add_node(NodeTemplate::new("provision").on_failure("rollback"))
//!     .add_node(NodeTemplate::new("rollback"));
//!
//! let workflow_id = manager.launch_workflow(&template).await?;
//! manager.tick().await?;
//! println!("workflow {workflow_id} underway");
//! # Ok(())
//! # }
//! ```
//!
//! ### Reporting Progress from the Engine Side
//!
//! ```rust,no_run
//! use taskweave::engine::StatusUpdate;
//! use taskweave::types::{JobId, JobStatus};
//!
//! # fn example(sender: flume::Sender<StatusUpdate>, job_id: JobId) {
//! // Engines push updates; the scheduler applies them on its next tick.
//! let _ = sender.send(StatusUpdate::new(job_id, JobStatus::Successful));
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`types`] - Core identifiers and enums
//! - [`job`] - The job record and its status machine
//! - [`graph`] - Workflow templates, materialization, and arena storage
//! - [`resolver`] - Ready/skip computation over node outcomes
//! - [`artifacts`] - Deterministic artifact propagation
//! - [`capacity`] - Execution groups and atomic reservations
//! - [`engine`] - The execution-engine boundary
//! - [`store`] - Persistence with optimistic concurrency
//! - [`auth`] - Per-job callback credentials
//! - [`event_bus`] - Status-transition event fan-out
//! - [`scheduler`] - The tick loop: lease, manager, dispatcher, aggregator
//! - [`telemetry`] - Event rendering for sinks

pub mod artifacts;
pub mod auth;
pub mod capacity;
pub mod engine;
pub mod event_bus;
pub mod graph;
pub mod job;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod utils;
