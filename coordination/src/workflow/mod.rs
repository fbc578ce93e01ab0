//! Background workflows: records, registry, naming and the scheduler
//!
//! - [`types`]: the [`Workflow`] record and its status state machine
//! - [`registry`]: the single mutation choke point for records
//! - [`naming`]: namer collaborator and fallback slugs
//! - [`scheduler`]: bounded background execution, cancellation and waiting

pub mod naming;
pub mod registry;
pub mod scheduler;
pub mod types;

pub use naming::{fallback_slug, sanitize_slug, NamingError, WorkflowNamer, MAX_SLUG_LEN};
pub use registry::{RegistryError, RegistryResult, WorkflowRegistry};
pub use scheduler::{
    SchedulerConfig, SchedulerError, SharedNamer, WorkflowRequest, WorkflowScheduler,
    INTERNAL_FAILURE,
};
pub use types::{Workflow, WorkflowFailure, WorkflowId, WorkflowStatus};
