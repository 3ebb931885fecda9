//! Materialization of workflow templates into executable graphs.
//!
//! [`GraphBuilder`] turns a [`WorkflowTemplate`]'s name-referenced edge
//! lists into an arena-backed [`WorkflowGraph`]: names are remapped to
//! fresh node indices, every node starts with `do_not_run = false` and
//! no spawned job, and the full directed multigraph (all three edge
//! kinds unioned) is checked for cycles before anything is handed to the
//! scheduler. This is a one-time step per workflow launch.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::edges::EdgeKind;
use super::template::{NodeTemplate, WorkflowTemplate};
use super::workflow::{WorkflowGraph, WorkflowNode};

/// Fatal validation errors raised at workflow launch. The workflow is
/// never created when any of these fire.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphValidationError {
    #[error("workflow template has no nodes")]
    #[diagnostic(code(taskweave::graph::empty_template))]
    EmptyTemplate,

    #[error("duplicate node name in template: {name}")]
    #[diagnostic(
        code(taskweave::graph::duplicate_node),
        help("Node names must be unique within one template.")
    )]
    DuplicateNode { name: String },

    #[error("edge from {from} references unknown node {to}")]
    #[diagnostic(
        code(taskweave::graph::unknown_edge_target),
        help("Every edge target must name a node defined in the same template.")
    )]
    UnknownEdgeTarget { from: String, to: String },

    #[error("workflow graph contains a cycle through: {}", nodes.join(" -> "))]
    #[diagnostic(
        code(taskweave::graph::cycle),
        help("The node graph, with all edge kinds unioned, must be acyclic.")
    )]
    CycleDetected { nodes: Vec<String> },
}

/// Builder producing a validated [`WorkflowGraph`].
///
/// Nodes can be accumulated with the fluent API or taken wholesale from
/// a template:
///
/// ```
/// use taskweave::graph::{GraphBuilder, NodeTemplate};
///
/// let graph = GraphBuilder::new()
///     .add_node(NodeTemplate::new("sync").on_success("deploy"))
///     .add_node(NodeTemplate::new("deploy"))
///     .build()
///     .expect("acyclic");
/// assert_eq!(graph.len(), 2);
/// ```
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<NodeTemplate>,
}

impl GraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    #[must_use]
    pub fn from_template(template: &WorkflowTemplate) -> Self {
        Self {
            nodes: template.nodes.clone(),
        }
    }

    #[must_use]
    pub fn add_node(mut self, node: NodeTemplate) -> Self {
        self.nodes.push(node);
        self
    }

    /// Validate and materialize the graph.
    ///
    /// Checks, in order: non-empty template, unique node names, edge
    /// targets that exist, and acyclicity of the unioned multigraph.
    pub fn build(self) -> Result<WorkflowGraph, GraphValidationError> {
        if self.nodes.is_empty() {
            return Err(GraphValidationError::EmptyTemplate);
        }

        let mut index_of: FxHashMap<&str, usize> = FxHashMap::default();
        for (idx, tpl) in self.nodes.iter().enumerate() {
            if index_of.insert(tpl.name.as_str(), idx).is_some() {
                return Err(GraphValidationError::DuplicateNode {
                    name: tpl.name.clone(),
                });
            }
        }

        let mut edges: Vec<(usize, EdgeKind, usize)> = Vec::new();
        for (idx, tpl) in self.nodes.iter().enumerate() {
            let edge_lists = [
                (EdgeKind::OnSuccess, &tpl.success_edges),
                (EdgeKind::OnFailure, &tpl.failure_edges),
                (EdgeKind::OnAlways, &tpl.always_edges),
            ];
            for (kind, targets) in edge_lists {
                for target in targets {
                    let to = *index_of.get(target.as_str()).ok_or_else(|| {
                        GraphValidationError::UnknownEdgeTarget {
                            from: tpl.name.clone(),
                            to: target.clone(),
                        }
                    })?;
                    edges.push((idx, kind, to));
                }
            }
        }

        detect_cycle(&self.nodes, &edges)?;

        let nodes = self
            .nodes
            .into_iter()
            .map(|tpl| {
                let mut node = WorkflowNode::new(tpl.name);
                node.fail_on_job_failure = tpl.fail_on_job_failure;
                node.timeout_secs = tpl.timeout_secs;
                node.task_impact = tpl.task_impact;
                node.eligible_groups = tpl.eligible_groups;
                node
            })
            .collect();

        Ok(WorkflowGraph::from_parts(nodes, edges))
    }
}

/// Kahn's algorithm over the unioned multigraph. Any leftover nodes sit
/// on a cycle; they are reported in arena order for a stable message.
fn detect_cycle(
    nodes: &[NodeTemplate],
    edges: &[(usize, EdgeKind, usize)],
) -> Result<(), GraphValidationError> {
    let n = nodes.len();
    let mut indegree = vec![0usize; n];
    for (_, _, to) in edges {
        indegree[*to] += 1;
    }
    let mut ready: Vec<usize> = (0..n).filter(|i| indegree[*i] == 0).collect();
    let mut visited = 0usize;
    while let Some(idx) = ready.pop() {
        visited += 1;
        for (from, _, to) in edges {
            if *from == idx {
                indegree[*to] -= 1;
                if indegree[*to] == 0 {
                    ready.push(*to);
                }
            }
        }
    }
    if visited == n {
        return Ok(());
    }
    let cyclic: Vec<String> = (0..n)
        .filter(|i| indegree[*i] > 0)
        .map(|i| nodes[i].name.clone())
        .collect();
    Err(GraphValidationError::CycleDetected { nodes: cyclic })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_linear_graph() {
        let graph = GraphBuilder::new()
            .add_node(NodeTemplate::new("a").on_success("b"))
            .add_node(NodeTemplate::new("b").on_failure("c"))
            .add_node(NodeTemplate::new("c"))
            .build()
            .unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.edges().len(), 2);
        assert_eq!(graph.roots(), vec![0]);
        let incoming: Vec<_> = graph.incoming(1).collect();
        assert_eq!(incoming, vec![(0, EdgeKind::OnSuccess)]);
    }

    #[test]
    fn rejects_empty_template() {
        let err = GraphBuilder::new().build().unwrap_err();
        assert!(matches!(err, GraphValidationError::EmptyTemplate));
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = GraphBuilder::new()
            .add_node(NodeTemplate::new("a"))
            .add_node(NodeTemplate::new("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphValidationError::DuplicateNode { .. }));
    }

    #[test]
    fn rejects_unknown_edge_target() {
        let err = GraphBuilder::new()
            .add_node(NodeTemplate::new("a").on_success("ghost"))
            .build()
            .unwrap_err();
        match err {
            GraphValidationError::UnknownEdgeTarget { from, to } => {
                assert_eq!(from, "a");
                assert_eq!(to, "ghost");
            }
            other => panic!("expected UnknownEdgeTarget, got {other:?}"),
        }
    }

    #[test]
    fn rejects_cycle_across_edge_kinds() {
        // a -on_success-> b -on_failure-> c -on_always-> a
        let err = GraphBuilder::new()
            .add_node(NodeTemplate::new("a").on_success("b"))
            .add_node(NodeTemplate::new("b").on_failure("c"))
            .add_node(NodeTemplate::new("c").on_always("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphValidationError::CycleDetected { .. }));
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let err = GraphBuilder::new()
            .add_node(NodeTemplate::new("a").on_always("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphValidationError::CycleDetected { .. }));
    }

    #[test]
    fn nodes_start_unspawned_and_runnable() {
        let graph = GraphBuilder::new()
            .add_node(NodeTemplate::new("a").fail_on_job_failure(true).with_task_impact(3))
            .build()
            .unwrap();
        let node = graph.node(0);
        assert!(node.spawned_job.is_none());
        assert!(!node.do_not_run);
        assert!(node.fail_on_job_failure);
        assert_eq!(node.task_impact, 3);
    }
}
