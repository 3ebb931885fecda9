//! Test doubles used by the integration tests.
//!
//! [`ManualEngine`] accepts every start (unless scripted to reject) and
//! then does nothing: tests drive job progress by pushing
//! [`StatusUpdate`](crate::engine::StatusUpdate)s into the manager's
//! callback sender, which keeps every scenario deterministic.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::engine::{EngineHandle, ExecutionEngine, StartError, StartRequest};
use crate::event_bus::{EventBus, MemorySink};
use crate::types::JobId;

/// An execution engine that records requests and never runs anything.
#[derive(Clone, Default)]
pub struct ManualEngine {
    starts: Arc<Mutex<Vec<StartRequest>>>,
    cancels: Arc<Mutex<Vec<JobId>>>,
    rejections: Arc<Mutex<usize>>,
}

impl ManualEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` start requests fail with
    /// [`StartError::Rejected`].
    pub fn reject_next(&self, n: usize) {
        *self.rejections.lock() = n;
    }

    /// Every start request accepted so far, in order.
    #[must_use]
    pub fn starts(&self) -> Vec<StartRequest> {
        self.starts.lock().clone()
    }

    /// Every cancel signal received so far, in order.
    #[must_use]
    pub fn cancels(&self) -> Vec<JobId> {
        self.cancels.lock().clone()
    }
}

#[async_trait]
impl ExecutionEngine for ManualEngine {
    async fn start(&self, request: StartRequest) -> Result<EngineHandle, StartError> {
        {
            let mut remaining = self.rejections.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StartError::Rejected {
                    job_id: request.job_id,
                    reason: "scripted rejection".to_string(),
                });
            }
        }
        let handle = EngineHandle {
            job_id: request.job_id,
            execution_node: Some("test-node-1".to_string()),
        };
        self.starts.lock().push(request);
        Ok(handle)
    }

    async fn signal_cancel(&self, job_id: JobId) {
        self.cancels.lock().push(job_id);
    }
}

/// An event bus wired to a memory sink, with the sink handle for
/// assertions.
#[must_use]
pub fn memory_bus() -> (EventBus, MemorySink) {
    let sink = MemorySink::new();
    let bus = EventBus::with_sink(sink.clone());
    (bus, sink)
}
