//! Tierforge coordination core
//!
//! This library provides:
//! - A purpose-keyed ladder of model tiers with validated escalation chains
//! - An escalation engine that walks the ladder with accumulated context
//! - Background workflows with a strict status state machine
//! - Progress reporting for live front-ends
//!
//! No network I/O happens here. Hosts supply a [`ModelInvoker`] and,
//! optionally, a [`WorkflowNamer`].
//!
//! # Components
//!
//! ## Tiers
//! - [`TierCatalog`]: `resolve(purpose, level)` and `next(tier)`, read-only after load
//!
//! ## Escalation
//! - [`EscalationEngine`]: `run(purpose, prompt, max_levels)` returning the first
//!   success or [`EscalationError::Exhausted`] with the full attempt history
//!
//! ## Workflows
//! - [`WorkflowRegistry`]: create / update / get / list / evict
//! - [`WorkflowScheduler`]: submit / cancel / await_completion
//! - [`ProgressReporter`]: publish / subscribe / flush
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use coordination::{
//!     EscalationEngine, SchedulerConfig, TierCatalog, WorkflowRegistry, WorkflowScheduler,
//! };
//!
//! let catalog = Arc::new(TierCatalog::builtin());
//! let engine = Arc::new(EscalationEngine::new(catalog, invoker));
//! let scheduler = WorkflowScheduler::new(
//!     Arc::new(WorkflowRegistry::new()),
//!     engine,
//!     SchedulerConfig::default(),
//! )?;
//!
//! let id = scheduler.submit("validate email addresses")?;
//! let workflow = scheduler.await_completion(&id, Duration::from_secs(600)).await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod escalation;
pub mod events;
pub mod invoker;
pub mod tiers;
pub mod workflow;

// Re-export tier types
pub use tiers::{CatalogConfig, CatalogError, Tier, TierCatalog, TierConfig, TierRef, MAX_CHAIN_LEN};

// Re-export escalation types
pub use escalation::{
    Attempt, AttemptLog, AttemptOutcome, EscalationEngine, EscalationError, EscalationListener,
    EscalationSuccess, NoopListener,
};

// Re-export invoker seam
pub use invoker::{InvokeError, ModelInvoker, SharedInvoker};

// Re-export workflow types
pub use workflow::{
    fallback_slug, sanitize_slug, NamingError, RegistryError, SchedulerConfig, SchedulerError,
    SharedNamer, Workflow, WorkflowFailure, WorkflowId, WorkflowNamer, WorkflowRegistry,
    WorkflowRequest, WorkflowScheduler, WorkflowStatus,
};

// Re-export progress types
pub use events::{
    ProgressEvent, ProgressFilter, ProgressKind, ProgressReporter, ProgressSubscription,
    SharedProgressReporter,
};
