//! Edge kinds and firing rules for workflow graphs.
//!
//! Every edge in a workflow graph carries one of three kinds, which
//! decide whether the edge "fires" once its source node's outcome is
//! known. A fired edge makes the target node eligible to dispatch.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::JobStatus;

/// The condition under which an edge fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Fires when the source node's job succeeded.
    OnSuccess,
    /// Fires when the source node's job failed.
    OnFailure,
    /// Fires regardless of the source outcome, including when the
    /// source node was skipped.
    OnAlways,
}

impl EdgeKind {
    /// Whether this edge fires for the given source outcome.
    ///
    /// A skipped node's success/failure edges never fire, but its
    /// always-edges still do; skip status propagates through the graph
    /// this way.
    #[must_use]
    pub fn fires(&self, outcome: NodeOutcome) -> bool {
        match self {
            Self::OnSuccess => outcome == NodeOutcome::Successful,
            Self::OnFailure => outcome == NodeOutcome::Failed,
            Self::OnAlways => true,
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OnSuccess => "on_success",
            Self::OnFailure => "on_failure",
            Self::OnAlways => "on_always",
        };
        write!(f, "{s}")
    }
}

/// Resolved outcome of a workflow node, as seen by edge firing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeOutcome {
    Successful,
    /// Covers `failed`, `error`, and `canceled` job statuses: from the
    /// graph's perspective all three mean "this path did not succeed".
    Failed,
    /// The node was marked `do_not_run`.
    Skipped,
}

impl NodeOutcome {
    /// Map a terminal job status to an outcome. Non-terminal statuses
    /// have no outcome yet.
    #[must_use]
    pub fn from_status(status: JobStatus) -> Option<Self> {
        match status {
            JobStatus::Successful => Some(Self::Successful),
            JobStatus::Failed | JobStatus::Error | JobStatus::Canceled => Some(Self::Failed),
            _ => None,
        }
    }
}
