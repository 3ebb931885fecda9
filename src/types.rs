//! Core identifiers and enums for the taskweave scheduling domain.
//!
//! This module defines the fundamental vocabulary used throughout the
//! system: job identity, execution-group identity, job status, job kind,
//! and launch provenance. These are the core domain concepts; runtime
//! machinery (ticks, leases, reservations) lives in [`crate::scheduler`].
//!
//! # Key Types
//!
//! - [`JobId`]: unique identity of a schedulable unit of work
//! - [`GroupId`]: identity of a capacity-bounded execution group
//! - [`JobStatus`]: the job lifecycle state machine's states
//! - [`JobKind`]: tagged variant distinguishing job flavors
//! - [`LaunchType`]: how a job came to exist
//!
//! # Examples
//!
//! ```rust
//! use taskweave::types::{JobId, JobStatus, JobKind};
//!
//! let id = JobId::new();
//! assert_eq!(JobStatus::Pending.to_string(), "pending");
//! assert!(JobStatus::Successful.is_terminal());
//! assert!(!JobStatus::Running.is_terminal());
//! let kind = JobKind::Standalone;
//! println!("job {id} is a {kind} job");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a [`Job`](crate::job::Job).
///
/// Backed by a UUID v4. `JobId` is `Copy` so it can be passed freely
/// through channels and callback payloads without ownership concerns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Identifier for an [`ExecutionGroup`](crate::capacity::ExecutionGroup).
///
/// Group names are operator-chosen strings ("default", "gpu-pool", ...).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for GroupId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state of a job.
///
/// Transitions are monotonic (a job only moves forward through the
/// lifecycle), with one exception: [`Canceled`](Self::Canceled) may
/// intercept any non-terminal state. Terminal states are final and
/// immutable; the status machine in [`crate::job`] enforces both rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created and awaiting admission by the dispatcher.
    Pending,
    /// Admitted: capacity reserved, start requested from the engine.
    Waiting,
    /// Engine acknowledged the start request.
    Running,
    /// Terminal: finished without failure.
    Successful,
    /// Terminal: the engine reported failure, or a timeout fired.
    Failed,
    /// Terminal: canceled before completion.
    Canceled,
    /// Terminal: the system could not run the job (e.g. start rejected).
    Error,
}

impl JobStatus {
    /// Returns `true` for states no further transition can leave.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Successful | Self::Failed | Self::Canceled | Self::Error
        )
    }

    /// Returns `true` while the job occupies reserved capacity.
    #[must_use]
    pub fn holds_capacity(&self) -> bool {
        matches!(self, Self::Waiting | Self::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Tagged variant distinguishing job flavors.
///
/// Dispatch logic branches on kind (workflow containers never reach the
/// execution engine) while the status-machine mechanics are shared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// A standalone automation job dispatched to the execution engine.
    Standalone,
    /// A source-control synchronization job.
    ProjectSync,
    /// An inventory refresh job.
    InventorySync,
    /// Container for a workflow graph; aggregated status only, no direct
    /// execution.
    WorkflowContainer,
}

impl JobKind {
    /// Returns `true` for kinds the dispatcher hands to the engine.
    #[must_use]
    pub fn is_dispatchable(&self) -> bool {
        !matches!(self, Self::WorkflowContainer)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Standalone => "standalone",
            Self::ProjectSync => "project_sync",
            Self::InventorySync => "inventory_sync",
            Self::WorkflowContainer => "workflow",
        };
        write!(f, "{s}")
    }
}

/// How a job came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchType {
    /// Launched directly by a caller.
    Manual,
    /// Spawned from a workflow node.
    Workflow,
    /// Created automatically as a prerequisite of another job.
    Dependency,
    /// Launched by a schedule.
    Scheduled,
}

impl fmt::Display for LaunchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Manual => "manual",
            Self::Workflow => "workflow",
            Self::Dependency => "dependency",
            Self::Scheduled => "scheduled",
        };
        write!(f, "{s}")
    }
}
