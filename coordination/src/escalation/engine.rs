//! Escalation Engine: drives one generation request up a tier ladder
//!
//! ```text
//! tier_1 ──fail──▶ tier_2 ──fail──▶ ... ──fail──▶ top / max_levels ──▶ Exhausted
//!   │                │
//!   └─ok──▶ done     └─ok──▶ done
//! ```
//!
//! Attempts are strictly sequential. Cancellation is observed only at tier
//! boundaries: before an attempt starts and once it resolves. An in-flight
//! backend call is never interrupted by cancellation.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::escalation::errors::EscalationError;
use crate::escalation::state::{Attempt, AttemptLog, AttemptOutcome};
use crate::invoker::{InvokeError, SharedInvoker};
use crate::tiers::{Tier, TierCatalog, TierRef, MAX_CHAIN_LEN};

/// Successful escalation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationSuccess {
    /// Text returned by the successful tier
    pub output: String,
    /// Tier that produced the output
    pub tier: TierRef,
    /// Every attempt, the successful one last
    pub attempts: Vec<Attempt>,
}

/// Observer for attempt-level events.
///
/// Called synchronously from the escalation task; implementations must not
/// block.
pub trait EscalationListener: Send + Sync {
    fn attempt_started(&self, _tier: &Tier, _number: u32) {}

    fn attempt_finished(&self, _attempt: &Attempt) {}

    fn escalating(&self, _from: &Tier, _to: &Tier, _after: AttemptOutcome) {}
}

/// Listener that ignores everything.
pub struct NoopListener;

impl EscalationListener for NoopListener {}

/// The Escalation Engine
pub struct EscalationEngine {
    catalog: Arc<TierCatalog>,
    invoker: SharedInvoker,
}

impl EscalationEngine {
    pub fn new(catalog: Arc<TierCatalog>, invoker: SharedInvoker) -> Self {
        Self { catalog, invoker }
    }

    pub fn catalog(&self) -> &TierCatalog {
        &self.catalog
    }

    /// Run without cancellation or observation.
    pub async fn run(
        &self,
        purpose: &str,
        initial_prompt: &str,
        max_levels: u32,
    ) -> Result<EscalationSuccess, EscalationError> {
        self.run_with(
            purpose,
            initial_prompt,
            max_levels,
            &CancellationToken::new(),
            &NoopListener,
        )
        .await
    }

    /// Walk the ladder for `purpose`, starting at tier_1.
    ///
    /// At most `max_levels` tiers are attempted (and never more than the
    /// chain length). Returns on the first success.
    pub async fn run_with(
        &self,
        purpose: &str,
        initial_prompt: &str,
        max_levels: u32,
        cancel: &CancellationToken,
        listener: &dyn EscalationListener,
    ) -> Result<EscalationSuccess, EscalationError> {
        if initial_prompt.trim().is_empty() {
            return Err(EscalationError::InvalidRequest(
                "initial prompt must not be empty".to_string(),
            ));
        }
        if max_levels == 0 {
            return Err(EscalationError::InvalidRequest(
                "max_levels must be at least 1".to_string(),
            ));
        }

        let cap = max_levels.min(MAX_CHAIN_LEN as u32);
        let mut tier = self.catalog.resolve(purpose, None)?;
        let mut log = AttemptLog::new(initial_prompt);

        loop {
            if cancel.is_cancelled() {
                info!(purpose, attempts = log.len(), "escalation cancelled");
                return Err(EscalationError::Cancelled {
                    attempts: log.into_attempts(),
                });
            }

            let number = log.len() as u32 + 1;
            let prompt = log.build_prompt(tier.context_budget);
            listener.attempt_started(tier, number);
            debug!(
                tier = %tier.tier_ref(),
                model = %tier.model_spec,
                attempt = number,
                prompt_chars = prompt.chars().count(),
                "invoking backend"
            );

            let started_at = Utc::now();
            let clock = Instant::now();
            let result = self.invoke(tier, &prompt).await;
            let elapsed = clock.elapsed();

            let (outcome, error_detail, output) = match result {
                Ok(text) => (AttemptOutcome::Success, None, Some(text)),
                Err(e) => (e.outcome(), Some(e.to_string()), None),
            };

            let attempt = Attempt {
                number,
                tier: tier.tier_ref(),
                model_spec: tier.model_spec.clone(),
                prompt_sent: prompt,
                outcome,
                error_detail,
                duration_elapsed: elapsed,
                started_at,
            };
            listener.attempt_finished(&attempt);
            log.push(attempt);

            if cancel.is_cancelled() {
                info!(purpose, attempts = log.len(), "escalation cancelled");
                return Err(EscalationError::Cancelled {
                    attempts: log.into_attempts(),
                });
            }

            if let Some(output) = output {
                info!(
                    tier = %tier.tier_ref(),
                    attempts = log.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "escalation succeeded"
                );
                return Ok(EscalationSuccess {
                    output,
                    tier: tier.tier_ref(),
                    attempts: log.into_attempts(),
                });
            }

            let next = if number >= cap {
                None
            } else {
                self.catalog.next(tier)
            };

            match next {
                Some(next) => {
                    info!(
                        from = %tier.tier_ref(),
                        to = %next.tier_ref(),
                        after = %outcome,
                        "escalating"
                    );
                    listener.escalating(tier, next, outcome);
                    tier = next;
                }
                None => {
                    warn!(
                        purpose,
                        last_tier = %tier.tier_ref(),
                        attempts = log.len(),
                        "escalation exhausted"
                    );
                    return Err(EscalationError::Exhausted {
                        purpose: purpose.to_string(),
                        last_tier: tier.tier_ref(),
                        attempts: log.into_attempts(),
                    });
                }
            }
        }
    }

    /// One bounded backend call. Empty completions count as rejections.
    async fn invoke(&self, tier: &Tier, prompt: &str) -> Result<String, InvokeError> {
        let call = self.invoker.invoke(&tier.model_spec, prompt, tier.timeout);
        let text = match tokio::time::timeout(tier.timeout, call).await {
            Ok(result) => result?,
            Err(_) => return Err(InvokeError::Timeout(tier.timeout)),
        };
        if text.trim().is_empty() {
            return Err(InvokeError::Rejected("empty completion".to_string()));
        }
        Ok(text)
    }
}
