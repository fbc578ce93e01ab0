//! Escalation Engine: tiered retries with accumulated context
//!
//! Converts one logical generation request into a bounded sequence of
//! backend invocations:
//!
//! ```text
//! tier_1 (small, fast)  | original prompt
//!     │ timeout / transport error / rejection
//!     ▼
//! tier_2                | original prompt + attempt 1 failure
//!     │ failure
//!     ▼
//! tier_n (top)          | original prompt + attempts 1..n-1
//!     │ failure
//!     ▼
//! EscalationExhausted { full attempt history }
//! ```
//!
//! The first success ends the run. Higher tiers are never touched once a
//! lower one has answered.

pub mod engine;
pub mod errors;
pub mod state;

pub use engine::{EscalationEngine, EscalationListener, EscalationSuccess, NoopListener};
pub use errors::EscalationError;
pub use state::{Attempt, AttemptLog, AttemptOutcome, PREVIOUS_ATTEMPTS_HEADER};
