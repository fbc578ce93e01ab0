//! Workflow record, status state machine and failure detail

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::escalation::{Attempt, EscalationError};
use crate::tiers::TierRef;

/// Unique workflow identifier: `wf-<UTC timestamp>-<sequence>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    pub(crate) fn allocate(seq: u64, at: DateTime<Utc>) -> Self {
        Self(format!("wf-{}-{:04}", at.format("%Y%m%d%H%M%S"), seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkflowId {
    fn from(raw: &str) -> Self {
        Self(raw.trim().to_string())
    }
}

impl From<String> for WorkflowId {
    fn from(raw: String) -> Self {
        Self(raw.trim().to_string())
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Workflow lifecycle.
///
/// ```text
/// QUEUED ──▶ NAMING ──▶ RUNNING ──▶ COMPLETED
///                          └──────▶ FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Queued,
    Naming,
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The transition table. Staying in place is not a transition.
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Naming)
                | (Self::Naming, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "QUEUED"),
            Self::Naming => write!(f, "NAMING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Terminal failure detail stored on a FAILED workflow.
///
/// The concise part lives here; the full history stays on
/// [`Workflow::attempts`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowFailure {
    /// Machine-readable code (`ESCALATION_EXHAUSTED`, `CANCELLED`, ...)
    pub code: String,
    /// One-line reason
    pub reason: String,
    /// Highest tier that was invoked, if any
    pub final_tier: Option<TierRef>,
    pub attempt_count: usize,
}

impl WorkflowFailure {
    pub const CANCELLED: &'static str = "CANCELLED";

    pub fn new(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            reason: reason.into(),
            final_tier: None,
            attempt_count: 0,
        }
    }

    pub fn cancelled(attempts: &[Attempt]) -> Self {
        Self {
            code: Self::CANCELLED.to_string(),
            reason: "workflow was cancelled".to_string(),
            final_tier: attempts.last().map(|a| a.tier.clone()),
            attempt_count: attempts.len(),
        }
    }

    pub fn from_escalation(err: &EscalationError) -> Self {
        if err.is_cancelled() {
            return Self::cancelled(err.attempts());
        }
        let reason = match err.attempts().last() {
            Some(last) => format!(
                "{} ({} on {})",
                err,
                last.outcome,
                last.tier.label()
            ),
            None => err.to_string(),
        };
        Self {
            code: err.code().to_string(),
            reason,
            final_tier: err.last_tier().cloned(),
            attempt_count: err.attempts().len(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == Self::CANCELLED
    }
}

impl std::fmt::Display for WorkflowFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.reason)
    }
}

/// Canonical workflow record. Owned by the registry; everyone else sees
/// clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    /// Allocation sequence number (monotonic)
    pub seq: u64,
    pub description: String,
    /// Set once by the naming step
    pub name: Option<String>,
    pub purpose: String,
    pub max_levels: u32,
    pub status: WorkflowStatus,
    /// Latest human-readable status line
    pub progress: Option<String>,
    /// Append-only attempt history
    pub attempts: Vec<Attempt>,
    /// Set only when COMPLETED
    pub result: Option<String>,
    /// Set only when FAILED
    pub error: Option<WorkflowFailure>,
    pub created_at: DateTime<Utc>,
    /// When the workflow entered RUNNING
    pub started_at: Option<DateTime<Utc>>,
    /// When the workflow reached a terminal state
    pub ended_at: Option<DateTime<Utc>>,
}

impl Workflow {
    pub(crate) fn new(
        id: WorkflowId,
        seq: u64,
        description: String,
        purpose: String,
        max_levels: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            seq,
            description,
            name: None,
            purpose,
            max_levels,
            status: WorkflowStatus::Queued,
            progress: None,
            attempts: Vec::new(),
            result: None,
            error: None,
            created_at,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Name if resolved, otherwise the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    /// Tier of the most recent attempt.
    pub fn current_tier(&self) -> Option<&TierRef> {
        self.attempts.last().map(|a| &a.tier)
    }

    /// Wall time from RUNNING to terminal (or until now if still running).
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        Some(self.ended_at.unwrap_or_else(Utc::now) - start)
    }

    /// `<id> <name> <status> <progress|error>` for tables and logs.
    pub fn summary_line(&self) -> String {
        let detail = match (&self.error, &self.progress) {
            (Some(err), _) => err.to_string(),
            (None, Some(progress)) => progress.clone(),
            (None, None) => String::new(),
        };
        format!(
            "{} {} {} {}",
            self.id,
            self.display_name(),
            self.status,
            detail
        )
        .trim_end()
        .to_string()
    }
}
