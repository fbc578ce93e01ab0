//! Progress event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflow::WorkflowId;

/// What a progress line is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// Lifecycle change (queued, naming, running)
    Status,
    /// An attempt started or resolved
    Attempt,
    /// Moving to a higher tier
    Escalation,
    /// COMPLETED or FAILED; never dropped by a lagging subscriber
    Terminal,
}

/// One status line for one workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub workflow_id: WorkflowId,
    pub kind: ProgressKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(workflow_id: WorkflowId, kind: ProgressKind, message: impl Into<String>) -> Self {
        Self {
            workflow_id,
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind == ProgressKind::Terminal
    }
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.workflow_id,
            self.message
        )
    }
}

/// Selects events for a filtered subscription
#[derive(Debug, Clone, Default)]
pub struct ProgressFilter {
    pub workflow_id: Option<WorkflowId>,
    pub terminal_only: bool,
}

impl ProgressFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workflow(mut self, id: &WorkflowId) -> Self {
        self.workflow_id = Some(id.clone());
        self
    }

    pub fn terminal_only(mut self) -> Self {
        self.terminal_only = true;
        self
    }

    pub fn matches(&self, event: &ProgressEvent) -> bool {
        if let Some(ref id) = self.workflow_id {
            if &event.workflow_id != id {
                return false;
            }
        }
        !self.terminal_only || event.is_terminal()
    }
}
