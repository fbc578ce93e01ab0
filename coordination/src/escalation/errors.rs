//! Escalation error taxonomy.
//!
//! | Variant           | Meaning                                          |
//! |-------------------|--------------------------------------------------|
//! | InvalidRequest    | caller error, nothing was invoked                |
//! | Catalog           | purpose or tier missing from the catalog         |
//! | Exhausted         | every permitted tier failed                      |
//! | Cancelled         | cancellation observed at a tier boundary         |
//!
//! Individual attempt failures never appear here; they are absorbed into the
//! attempt history that `Exhausted` and `Cancelled` carry.

use thiserror::Error;

use crate::escalation::state::Attempt;
use crate::tiers::{CatalogError, TierRef};

#[derive(Debug, Clone, Error)]
pub enum EscalationError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Escalation exhausted at {last_tier} after {} attempt(s)", .attempts.len())]
    Exhausted {
        purpose: String,
        last_tier: TierRef,
        attempts: Vec<Attempt>,
    },

    #[error("Cancelled after {} attempt(s)", .attempts.len())]
    Cancelled { attempts: Vec<Attempt> },
}

impl EscalationError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Catalog(e) => e.code(),
            Self::Exhausted { .. } => "ESCALATION_EXHAUSTED",
            Self::Cancelled { .. } => "CANCELLED",
        }
    }

    /// Attempts made before the run ended (empty for request/catalog errors).
    pub fn attempts(&self) -> &[Attempt] {
        match self {
            Self::Exhausted { attempts, .. } | Self::Cancelled { attempts } => {
                attempts.as_slice()
            }
            _ => &[],
        }
    }

    /// Highest tier actually invoked.
    pub fn last_tier(&self) -> Option<&TierRef> {
        match self {
            Self::Exhausted { last_tier, .. } => Some(last_tier),
            Self::Cancelled { attempts } => attempts.last().map(|a| &a.tier),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            EscalationError::InvalidRequest("empty".into()).code(),
            "INVALID_REQUEST"
        );
        assert_eq!(
            EscalationError::Cancelled { attempts: vec![] }.code(),
            "CANCELLED"
        );
        assert_eq!(
            EscalationError::from(CatalogError::UnknownPurpose("x".into())).code(),
            "UNKNOWN_PURPOSE"
        );
    }

    #[test]
    fn exhausted_display_counts_attempts() {
        let err = EscalationError::Exhausted {
            purpose: "coding".into(),
            last_tier: TierRef::new("coding", 2),
            attempts: vec![],
        };
        assert_eq!(
            err.to_string(),
            "Escalation exhausted at coding/tier_2 after 0 attempt(s)"
        );
        assert_eq!(err.last_tier(), Some(&TierRef::new("coding", 2)));
    }
}
