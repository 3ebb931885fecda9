//! Artifact propagation through workflow graphs.
//!
//! On a job's terminal success its `artifacts` mapping is recorded on
//! the originating node; descendants reached by fired edges then see the
//! union of each parent's own artifacts and that parent's accumulated
//! `ancestor_artifacts`. Merging is done in deterministic topological
//! order so replaying identical node outcomes always yields identical
//! `ancestor_artifacts` at every node.
//!
//! Collision rules: within one lineage the closest ancestor wins (a
//! parent's own artifacts overlay anything it inherited). Across
//! parents at equal distance, fired parents are applied in ascending
//! arena index, so the highest-indexed parent wins: an arbitrary but
//! stable tie-break.

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::graph::{NodeOutcome, WorkflowGraph};
use crate::types::{JobId, JobStatus};

/// Record a successfully finished job's output on its node.
pub fn record_node_artifacts(
    graph: &mut WorkflowGraph,
    idx: usize,
    artifacts: &FxHashMap<String, Value>,
) {
    let node = graph.node_mut(idx);
    for (key, value) in artifacts {
        node.artifacts.insert(key.clone(), value.clone());
    }
}

/// Recompute `ancestor_artifacts` for every node from current outcomes.
///
/// Parents are processed before children (topological order), so one
/// pass suffices. Nodes with no fired incoming edge keep whatever they
/// already had; dispatched children receive the result as part of their
/// start request.
pub fn propagate<F>(graph: &mut WorkflowGraph, status_of: &F)
where
    F: Fn(JobId) -> Option<JobStatus>,
{
    let order = graph.topo_order();
    for idx in order {
        let mut parents: Vec<_> = graph.incoming(idx).collect();
        parents.sort_by_key(|(parent, _)| *parent);

        let mut merged: FxHashMap<String, Value> = FxHashMap::default();
        let mut any_fired = false;
        for (parent, kind) in parents {
            let node = graph.node(parent);
            let outcome = if node.do_not_run {
                Some(NodeOutcome::Skipped)
            } else {
                node.spawned_job
                    .and_then(&status_of)
                    .and_then(NodeOutcome::from_status)
            };
            let Some(outcome) = outcome else { continue };
            if !kind.fires(outcome) {
                continue;
            }
            any_fired = true;
            for (key, value) in &node.ancestor_artifacts {
                merged.insert(key.clone(), value.clone());
            }
            // Closest ancestor wins: the parent's own output overlays
            // whatever it inherited.
            for (key, value) in &node.artifacts {
                merged.insert(key.clone(), value.clone());
            }
        }
        if any_fired {
            graph.node_mut(idx).ancestor_artifacts = merged;
        }
    }
}
