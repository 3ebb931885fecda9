//! Workflow graph domain: templates, materialization, and arena storage.
//!
//! A workflow launch takes a [`WorkflowTemplate`], materializes it into
//! an immutable [`WorkflowGraph`] via [`GraphBuilder`] (validating
//! acyclicity over all edge kinds), and binds the result to a new
//! [`WorkflowJob`]. After that, only the per-node skip markers and
//! artifact maps ever change.

pub mod builder;
pub mod edges;
pub mod template;
pub mod workflow;

pub use builder::{GraphBuilder, GraphValidationError};
pub use edges::{EdgeKind, NodeOutcome};
pub use template::{NodeTemplate, WorkflowTemplate};
pub use workflow::{WorkflowGraph, WorkflowJob, WorkflowNode};
