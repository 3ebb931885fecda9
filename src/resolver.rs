//! Dependency resolution over workflow graphs.
//!
//! Given the current status of every node's spawned job, the resolver
//! decides which nodes are eligible to dispatch now and which must be
//! permanently skipped. It runs after every job status transition that
//! could unblock descendants, and before every dispatcher tick.
//!
//! # Rules
//!
//! Incoming edges are OR-combined: a node becomes ready the first time
//! *any* incoming edge fires, not only once all parents resolve. A root
//! node with no incoming edges is ready immediately. A node is
//! permanently skipped once all of its predecessors are resolved
//! (terminal or skipped) and none of its incoming edges fired; skip
//! status then propagates, with `on_always` edges still firing out of
//! skipped nodes. Re-evaluation is idempotent: a node that already has a
//! spawned job is never reported ready again.

use rustc_hash::FxHashSet;

use crate::graph::{NodeOutcome, WorkflowGraph, WorkflowNode};
use crate::types::{JobId, JobStatus};

/// Outcome of one resolver pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Nodes eligible to dispatch now, ascending arena index.
    pub ready: Vec<usize>,
    /// Nodes that became permanently skipped in this pass. The caller
    /// must set `do_not_run` on them and persist.
    pub newly_skipped: Vec<usize>,
}

/// Resolved outcome of a node, treating both persisted and
/// this-pass skips as `Skipped`.
fn outcome_of<F>(
    node: &WorkflowNode,
    idx: usize,
    skipped: &FxHashSet<usize>,
    status_of: &F,
) -> Option<NodeOutcome>
where
    F: Fn(JobId) -> Option<JobStatus>,
{
    if node.do_not_run || skipped.contains(&idx) {
        return Some(NodeOutcome::Skipped);
    }
    let job_id = node.spawned_job?;
    NodeOutcome::from_status(status_of(job_id)?)
}

/// Compute ready and newly-skipped nodes for one workflow graph.
///
/// `status_of` reports the current status of a spawned job, or `None`
/// if the job is unknown. Runs to fixpoint internally so that skips
/// discovered in one iteration propagate through always-edges in the
/// same pass.
pub fn resolve<F>(graph: &WorkflowGraph, status_of: &F) -> Resolution
where
    F: Fn(JobId) -> Option<JobStatus>,
{
    let mut ready: FxHashSet<usize> = FxHashSet::default();
    let mut skipped: FxHashSet<usize> = FxHashSet::default();

    loop {
        let mut changed = false;
        for idx in 0..graph.len() {
            let node = graph.node(idx);
            if node.spawned_job.is_some()
                || node.do_not_run
                || ready.contains(&idx)
                || skipped.contains(&idx)
            {
                continue;
            }

            let incoming: Vec<_> = graph.incoming(idx).collect();
            if incoming.is_empty() {
                ready.insert(idx);
                changed = true;
                continue;
            }

            let mut any_fired = false;
            let mut all_resolved = true;
            for (parent, kind) in &incoming {
                match outcome_of(graph.node(*parent), *parent, &skipped, status_of) {
                    Some(outcome) => {
                        if kind.fires(outcome) {
                            any_fired = true;
                            break;
                        }
                    }
                    None => all_resolved = false,
                }
            }

            if any_fired {
                ready.insert(idx);
                changed = true;
            } else if all_resolved {
                skipped.insert(idx);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let mut ready: Vec<usize> = ready.into_iter().collect();
    ready.sort_unstable();
    let mut newly_skipped: Vec<usize> = skipped.into_iter().collect();
    newly_skipped.sort_unstable();
    Resolution {
        ready,
        newly_skipped,
    }
}

/// Whether every node reachable on a non-skipped path is terminal.
///
/// A workflow with any node still dispatchable, running, or not yet
/// resolved is not done. Nodes that are (or would become) skipped do
/// not block completion.
pub fn is_workflow_done<F>(graph: &WorkflowGraph, status_of: &F) -> bool
where
    F: Fn(JobId) -> Option<JobStatus>,
{
    let resolution = resolve(graph, status_of);
    if !resolution.ready.is_empty() {
        return false;
    }
    let pending_skips: FxHashSet<usize> = resolution.newly_skipped.into_iter().collect();
    for idx in 0..graph.len() {
        let node = graph.node(idx);
        if node.do_not_run || pending_skips.contains(&idx) {
            continue;
        }
        match node.spawned_job {
            Some(job_id) => match status_of(job_id) {
                Some(status) if status.is_terminal() => {}
                _ => return false,
            },
            // Unspawned, not ready, not skippable yet: still waiting on
            // an in-flight ancestor.
            None => return false,
        }
    }
    true
}

/// Whether an unrecovered qualifying failure marks the workflow failed.
///
/// Two conditions poison a workflow:
///
/// - a node flagged `fail_on_job_failure` failed. Descendants still run
///   through fired failure/always edges, but nothing recovers the
///   qualifying failure itself; the workflow finishes `failed`.
/// - an unflagged node failed with no `on_failure`/`on_always` edge to
///   hand the failure to: a dead-end failure nobody could react to.
pub fn has_failed<F>(graph: &WorkflowGraph, status_of: &F) -> bool
where
    F: Fn(JobId) -> Option<JobStatus>,
{
    let empty = FxHashSet::default();
    for idx in 0..graph.len() {
        let node = graph.node(idx);
        if outcome_of(node, idx, &empty, status_of) != Some(NodeOutcome::Failed) {
            continue;
        }
        if node.fail_on_job_failure {
            return true;
        }
        let handled = graph
            .outgoing(idx)
            .any(|(kind, _)| kind.fires(NodeOutcome::Failed));
        if !handled {
            return true;
        }
    }
    false
}
