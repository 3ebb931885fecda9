//! Arena-backed workflow graphs and their nodes.
//!
//! A [`WorkflowGraph`] stores nodes in a flat indexed `Vec` and edges as
//! `(source, kind, target)` index triples. Index-based storage keeps
//! cycle detection and serialization simple and avoids live object
//! references between nodes.
//!
//! The graph is immutable after materialization except for two fields on
//! each node: `do_not_run` (the terminal skip marker set by the
//! dependency resolver) and the artifact maps maintained by the artifact
//! propagator.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::edges::EdgeKind;
use crate::types::{GroupId, JobId};

/// One step in a materialized workflow graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub name: String,
    /// Non-owning reference to the job spawned for this node, set once
    /// at dispatch. The job record outlives the workflow for audit.
    pub spawned_job: Option<JobId>,
    pub fail_on_job_failure: bool,
    /// Terminal skip marker: no incoming edge can ever fire.
    pub do_not_run: bool,
    /// Output data recorded from this node's job on terminal success.
    pub artifacts: FxHashMap<String, Value>,
    /// Upstream artifact data accumulated along fired edges.
    pub ancestor_artifacts: FxHashMap<String, Value>,
    pub timeout_secs: u64,
    pub task_impact: u32,
    pub eligible_groups: Vec<GroupId>,
}

impl WorkflowNode {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            spawned_job: None,
            fail_on_job_failure: false,
            do_not_run: false,
            artifacts: FxHashMap::default(),
            ancestor_artifacts: FxHashMap::default(),
            timeout_secs: 0,
            task_impact: 1,
            eligible_groups: Vec::new(),
        }
    }
}

/// A directed multigraph of workflow nodes, validated acyclic at build
/// time.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkflowGraph {
    nodes: Vec<WorkflowNode>,
    edges: Vec<(usize, EdgeKind, usize)>,
}

impl WorkflowGraph {
    pub(crate) fn from_parts(
        nodes: Vec<WorkflowNode>,
        edges: Vec<(usize, EdgeKind, usize)>,
    ) -> Self {
        Self { nodes, edges }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn node(&self, idx: usize) -> &WorkflowNode {
        &self.nodes[idx]
    }

    pub fn node_mut(&mut self, idx: usize) -> &mut WorkflowNode {
        &mut self.nodes[idx]
    }

    #[must_use]
    pub fn nodes(&self) -> &[WorkflowNode] {
        &self.nodes
    }

    #[must_use]
    pub fn edges(&self) -> &[(usize, EdgeKind, usize)] {
        &self.edges
    }

    /// Edges pointing into `idx`, as `(source, kind)` pairs in edge
    /// insertion order.
    pub fn incoming(&self, idx: usize) -> impl Iterator<Item = (usize, EdgeKind)> + '_ {
        self.edges
            .iter()
            .filter(move |(_, _, to)| *to == idx)
            .map(|(from, kind, _)| (*from, *kind))
    }

    /// Edges leaving `idx`, as `(kind, target)` pairs in edge insertion
    /// order.
    pub fn outgoing(&self, idx: usize) -> impl Iterator<Item = (EdgeKind, usize)> + '_ {
        self.edges
            .iter()
            .filter(move |(from, _, _)| *from == idx)
            .map(|(_, kind, to)| (*kind, *to))
    }

    /// Indices of nodes with no incoming edges of any kind.
    #[must_use]
    pub fn roots(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|idx| self.incoming(*idx).next().is_none())
            .collect()
    }

    /// Node indices in a deterministic topological order.
    ///
    /// Kahn's algorithm with an index-ordered ready set; ties always
    /// break toward the lower arena index, so the order is identical
    /// across runs. The graph is acyclic by construction, so every node
    /// appears exactly once.
    #[must_use]
    pub fn topo_order(&self) -> Vec<usize> {
        let n = self.nodes.len();
        let mut indegree = vec![0usize; n];
        for (_, _, to) in &self.edges {
            indegree[*to] += 1;
        }
        let mut ready: Vec<usize> = (0..n).filter(|i| indegree[*i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(&idx) = ready.iter().min() {
            ready.retain(|i| *i != idx);
            order.push(idx);
            for (_, to) in self.outgoing(idx) {
                indegree[to] -= 1;
                if indegree[to] == 0 {
                    ready.push(to);
                }
            }
        }
        order
    }

    /// Look up the node a spawned job belongs to.
    #[must_use]
    pub fn node_for_job(&self, job_id: JobId) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.spawned_job == Some(job_id))
    }
}

/// A job subtype owning a graph of workflow nodes.
///
/// The container [`Job`](crate::job::Job) record (kind
/// `WorkflowContainer`) carries the aggregated status; this type couples
/// that job's identity with its exclusively-owned graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowJob {
    /// Identity of the container job.
    pub id: JobId,
    pub template_name: String,
    pub graph: WorkflowGraph,
    /// Optimistic-concurrency version for the state store.
    pub version: u64,
}

impl WorkflowJob {
    #[must_use]
    pub fn new(id: JobId, template_name: impl Into<String>, graph: WorkflowGraph) -> Self {
        Self {
            id,
            template_name: template_name.into(),
            graph,
            version: 0,
        }
    }
}
