//! Escalation State: ordered attempt log and prompt accumulation
//!
//! Attempt *n* is sent the original prompt followed by one block per prior
//! attempt (tier, model, outcome, failure detail):
//!
//! ```text
//! <original prompt>
//!
//! ## Previous attempts
//! [attempt 1] coding/tier_1 via local:small: timeout
//! timed out after 60s
//! [attempt 2] coding/tier_2 via local:large: rejected
//! rejected by backend: cannot comply
//! ```
//!
//! Every earlier prompt is a prefix of the next one, so later prompts carry
//! all earlier prompts verbatim without nesting them. When a tier's context
//! budget is too small the oldest blocks are dropped first.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tiers::TierRef;

/// Header separating the original prompt from accumulated failures.
pub const PREVIOUS_ATTEMPTS_HEADER: &str = "## Previous attempts";

/// How a single backend invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    /// Tier timeout elapsed
    Timeout,
    /// Network / protocol failure
    TransportError,
    /// Backend explicitly declined
    Rejected,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Timeout => write!(f, "timeout"),
            Self::TransportError => write!(f, "transport error"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Record of one backend invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// 1-indexed position within the escalation run
    pub number: u32,
    pub tier: TierRef,
    pub model_spec: String,
    pub prompt_sent: String,
    pub outcome: AttemptOutcome,
    /// Present for every non-success outcome
    pub error_detail: Option<String>,
    pub duration_elapsed: Duration,
    pub started_at: DateTime<Utc>,
}

impl Attempt {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_success()
    }

    /// Block appended to later prompts.
    fn context_block(&self) -> String {
        format!(
            "[attempt {}] {} via {}: {}\n{}\n",
            self.number,
            self.tier,
            self.model_spec,
            self.outcome,
            self.error_detail.as_deref().unwrap_or("no detail"),
        )
    }
}

/// Append-only log for one escalation run
#[derive(Debug, Clone)]
pub struct AttemptLog {
    original_prompt: String,
    attempts: Vec<Attempt>,
}

impl AttemptLog {
    pub fn new(original_prompt: impl Into<String>) -> Self {
        Self {
            original_prompt: original_prompt.into(),
            attempts: Vec::new(),
        }
    }

    pub fn push(&mut self, attempt: Attempt) {
        self.attempts.push(attempt);
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn into_attempts(self) -> Vec<Attempt> {
        self.attempts
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn last(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    pub fn original_prompt(&self) -> &str {
        &self.original_prompt
    }

    /// Prompt for the next attempt, fitted to `budget` characters.
    ///
    /// The first attempt always receives the original prompt verbatim.
    pub fn build_prompt(&self, budget: usize) -> String {
        if self.attempts.is_empty() {
            return self.original_prompt.clone();
        }

        let head = format!("{}\n\n{}\n", self.original_prompt, PREVIOUS_ATTEMPTS_HEADER);
        let blocks: Vec<String> = self.attempts.iter().map(Attempt::context_block).collect();

        let full = format!("{}{}", head, blocks.concat());
        if char_len(&full) <= budget {
            return full;
        }

        // Drop oldest blocks first, always keeping the most recent failure.
        let mut candidate = full;
        for skip in 1..blocks.len() {
            candidate = format!(
                "{}[{} earlier attempt(s) omitted]\n{}",
                head,
                skip,
                blocks[skip..].concat()
            );
            if char_len(&candidate) <= budget {
                return candidate;
            }
        }

        if blocks.len() == 1 {
            candidate = format!("{}{}", head, blocks[0]);
        }
        keep_tail(&candidate, budget)
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Last `budget` characters of `s`, respecting char boundaries.
fn keep_tail(s: &str, budget: usize) -> String {
    let len = char_len(s);
    if len <= budget {
        return s.to_string();
    }
    s.chars().skip(len - budget).collect()
}
