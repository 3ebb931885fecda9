//! Execution engine boundary.
//!
//! The scheduler never runs work itself. Admitted jobs are handed to an
//! [`ExecutionEngine`] implementation through [`StartRequest`]; the
//! engine reports progress back asynchronously as [`StatusUpdate`]s on
//! the scheduler's callback channel. Nothing in this crate blocks on a
//! job finishing.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{GroupId, JobId, JobKind, JobStatus};

/// Everything the engine needs to start one job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartRequest {
    pub job_id: JobId,
    pub kind: JobKind,
    /// Group the dispatcher admitted the job into.
    pub execution_group: GroupId,
    pub task_impact: u32,
    pub timeout_secs: u64,
    /// Merged upstream artifacts for workflow-spawned jobs; empty for
    /// standalone launches.
    pub ancestor_artifacts: FxHashMap<String, Value>,
    /// Bearer token the execution side presents on status callbacks.
    pub callback_token: String,
}

/// Engine acknowledgment of a start request.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    pub job_id: JobId,
    /// Node the engine placed the job on, when it knows.
    pub execution_node: Option<String>,
}

/// Start refusal. The dispatcher rolls the reservation back and marks
/// the job `error`; the failure never propagates as a panic or a retry
/// storm.
#[derive(Debug, Error, Diagnostic)]
pub enum StartError {
    #[error("engine rejected job {job_id}: {reason}")]
    #[diagnostic(code(taskweave::engine::rejected))]
    Rejected { job_id: JobId, reason: String },

    #[error("engine unavailable: {reason}")]
    #[diagnostic(
        code(taskweave::engine::unavailable),
        help("The job is marked `error`; relaunch it once the engine is reachable.")
    )]
    Unavailable { reason: String },
}

/// Asynchronous progress report from the engine.
///
/// Updates are queued on a channel and drained at the start of the next
/// scheduler tick; callbacks never mutate scheduler state inline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Output artifacts, reported with the terminal update.
    pub artifacts: Option<FxHashMap<String, Value>>,
}

impl StatusUpdate {
    #[must_use]
    pub fn new(job_id: JobId, status: JobStatus) -> Self {
        Self {
            job_id,
            status,
            artifacts: None,
        }
    }

    #[must_use]
    pub fn with_artifacts(mut self, artifacts: FxHashMap<String, Value>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }
}

/// External executor of admitted jobs.
///
/// Implementations are expected to be cheap to call: `start` should
/// enqueue or fork the real work and return once the job is accepted,
/// and `signal_cancel` is advisory (the scheduler force-fails the job
/// itself if the engine does not confirm within the cancel grace
/// period).
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn start(&self, request: StartRequest) -> Result<EngineHandle, StartError>;

    /// Ask the engine to stop a job. Cooperative; may be ignored.
    async fn signal_cancel(&self, job_id: JobId);
}
