use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::{JobId, JobStatus};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Event {
    Transition(TransitionEvent),
    Diagnostic(DiagnosticEvent),
}

impl Event {
    /// One of these is emitted for every accepted job status transition.
    pub fn transition(job_id: JobId, from: JobStatus, to: JobStatus) -> Self {
        Event::Transition(TransitionEvent {
            job_id,
            from,
            to,
            at: Utc::now(),
        })
    }

    pub fn diagnostic(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Diagnostic(DiagnosticEvent {
            scope: scope.into(),
            message: message.into(),
        })
    }

    pub fn scope_label(&self) -> &str {
        match self {
            Event::Transition(_) => "transition",
            Event::Diagnostic(diag) => diag.scope(),
        }
    }

    /// Normalized JSON shape shared by both variants: `type`, `scope`,
    /// `message`, `timestamp`, and a variant-specific `metadata` object.
    /// Transition metadata carries `job_id`, `from`, and `to`.
    pub fn to_json_value(&self) -> Value {
        let (event_type, metadata, timestamp) = match self {
            Event::Transition(t) => (
                "transition",
                json!({
                    "job_id": t.job_id.to_string(),
                    "from": t.from,
                    "to": t.to,
                }),
                t.at,
            ),
            Event::Diagnostic(_) => ("diagnostic", json!({}), Utc::now()),
        };
        json!({
            "type": event_type,
            "scope": self.scope_label(),
            "message": self.to_string(),
            "timestamp": timestamp.to_rfc3339(),
            "metadata": metadata,
        })
    }

    /// Single-line JSON rendering, suitable for log shipping.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json_value())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Transition(t) => {
                write!(f, "job {} {} -> {}", t.job_id, t.from, t.to)
            }
            Event::Diagnostic(diag) => write!(f, "[{}] {}", diag.scope, diag.message),
        }
    }
}

/// A job status transition that was accepted by the status machine.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransitionEvent {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticEvent {
    scope: String,
    message: String,
}

impl DiagnosticEvent {
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
