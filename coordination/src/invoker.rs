//! Model backend invocation seam
//!
//! The core never talks to a backend directly. Hosts plug in an implementation
//! of [`ModelInvoker`]; tests use scripted in-process invokers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::escalation::state::AttemptOutcome;

/// Why a single backend invocation failed.
///
/// All three are ordinary attempt failures: they are recorded and drive
/// escalation, they never abort a workflow on their own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    /// The call did not finish within the tier's timeout.
    #[error("timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// Network, connection or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered but explicitly declined (refusal, content filter,
    /// empty completion, malformed request).
    #[error("rejected by backend: {0}")]
    Rejected(String),
}

impl InvokeError {
    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            Self::Timeout(_) => AttemptOutcome::Timeout,
            Self::Transport(_) => AttemptOutcome::TransportError,
            Self::Rejected(_) => AttemptOutcome::Rejected,
        }
    }
}

/// A model backend. Must be safe to call from many workflow tasks at once.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Send `prompt` to the model selected by `model_spec`.
    ///
    /// Implementations should honour `timeout`; the engine enforces it as
    /// well, so an invoker that ignores it still cannot stall a workflow.
    async fn invoke(
        &self,
        model_spec: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, InvokeError>;
}

/// Shared reference to a ModelInvoker
pub type SharedInvoker = Arc<dyn ModelInvoker>;
