//! Launch-time workflow templates.
//!
//! A [`WorkflowTemplate`] is the caller-facing description of a workflow:
//! named step definitions with edge lists referencing other steps by
//! name. Templates are materialized into an arena-backed
//! [`WorkflowGraph`](super::workflow::WorkflowGraph) exactly once per
//! launch by the [`GraphBuilder`](super::builder::GraphBuilder).

use serde::{Deserialize, Serialize};

use crate::types::GroupId;

/// One step definition inside a workflow template.
///
/// Edge lists hold the *names* of other template nodes; the builder
/// remaps them to arena indices at launch.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeTemplate {
    pub name: String,
    #[serde(default)]
    pub success_edges: Vec<String>,
    #[serde(default)]
    pub failure_edges: Vec<String>,
    #[serde(default)]
    pub always_edges: Vec<String>,
    /// If true, this node's failure marks the whole workflow failed
    /// unless a later failure/always path keeps execution going.
    #[serde(default)]
    pub fail_on_job_failure: bool,
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(default = "default_task_impact")]
    pub task_impact: u32,
    #[serde(default)]
    pub eligible_groups: Vec<GroupId>,
}

fn default_task_impact() -> u32 {
    1
}

impl NodeTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task_impact: 1,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn on_success(mut self, target: impl Into<String>) -> Self {
        self.success_edges.push(target.into());
        self
    }

    #[must_use]
    pub fn on_failure(mut self, target: impl Into<String>) -> Self {
        self.failure_edges.push(target.into());
        self
    }

    #[must_use]
    pub fn on_always(mut self, target: impl Into<String>) -> Self {
        self.always_edges.push(target.into());
        self
    }

    #[must_use]
    pub fn fail_on_job_failure(mut self, flag: bool) -> Self {
        self.fail_on_job_failure = flag;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    #[must_use]
    pub fn with_task_impact(mut self, task_impact: u32) -> Self {
        self.task_impact = task_impact;
        self
    }

    #[must_use]
    pub fn with_eligible_groups(mut self, groups: Vec<GroupId>) -> Self {
        self.eligible_groups = groups;
        self
    }
}

/// A workflow template: a named set of step definitions.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub name: String,
    pub nodes: Vec<NodeTemplate>,
}

impl WorkflowTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    #[must_use]
    pub fn add_node(mut self, node: NodeTemplate) -> Self {
        self.nodes.push(node);
        self
    }
}
