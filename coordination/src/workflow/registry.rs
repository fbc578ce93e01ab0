//! Workflow Registry: the single owner of workflow records
//!
//! Every mutation goes through [`WorkflowRegistry::update`], which applies a
//! caller-supplied mutator to a private copy, validates the result against
//! the status state machine and the record invariants, and only then commits
//! it. Readers always see whole records: a status of COMPLETED is never
//! observable without its result.
//!
//! One global `RwLock` guards the map. Hold times are a clone plus a handful
//! of field checks and never span a backend call.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::types::{Workflow, WorkflowId, WorkflowStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Workflow not found: {0}")]
    NotFound(WorkflowId),

    #[error("Illegal transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: WorkflowId,
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("Workflow {id} is already {status}")]
    TerminalState { id: WorkflowId, status: WorkflowStatus },

    #[error("Invariant violated for {id}: {reason}")]
    InvariantViolation { id: WorkflowId, reason: String },

    #[error("Workflow {id} is still {status}")]
    StillActive { id: WorkflowId, status: WorkflowStatus },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Registry lock poisoned")]
    LockPoisoned,
}

impl RegistryError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            Self::TerminalState { .. } => "TERMINAL_STATE",
            Self::InvariantViolation { .. } => "INVARIANT_VIOLATION",
            Self::StillActive { .. } => "STILL_ACTIVE",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::LockPoisoned => "LOCK_POISONED",
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

struct Entry {
    workflow: Workflow,
    status_tx: watch::Sender<WorkflowStatus>,
}

/// Concurrent-safe map from workflow id to record.
pub struct WorkflowRegistry {
    entries: RwLock<HashMap<WorkflowId, Entry>>,
    next_seq: AtomicU64,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    fn read(&self) -> RegistryResult<RwLockReadGuard<'_, HashMap<WorkflowId, Entry>>> {
        self.entries.read().map_err(|_| RegistryError::LockPoisoned)
    }

    fn write(&self) -> RegistryResult<RwLockWriteGuard<'_, HashMap<WorkflowId, Entry>>> {
        self.entries.write().map_err(|_| RegistryError::LockPoisoned)
    }

    /// Register a new QUEUED workflow and return its id.
    pub fn create(
        &self,
        description: &str,
        purpose: &str,
        max_levels: u32,
    ) -> RegistryResult<WorkflowId> {
        let description = description.trim();
        if description.is_empty() {
            return Err(RegistryError::InvalidRequest(
                "description must not be empty".to_string(),
            ));
        }
        if max_levels == 0 {
            return Err(RegistryError::InvalidRequest(
                "max_levels must be at least 1".to_string(),
            ));
        }

        let mut entries = self.write()?;
        // Allocated under the write lock so ids and map order agree.
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let id = WorkflowId::allocate(seq, now);
        let workflow = Workflow::new(
            id.clone(),
            seq,
            description.to_string(),
            purpose.to_string(),
            max_levels,
            now,
        );
        let (status_tx, _) = watch::channel(WorkflowStatus::Queued);
        entries.insert(
            id.clone(),
            Entry {
                workflow,
                status_tx,
            },
        );
        debug!(workflow_id = %id, seq, "Workflow registered");
        Ok(id)
    }

    /// Atomically apply `mutator` to the record and return the committed copy.
    ///
    /// The mutator works on a scratch copy; nothing is committed unless the
    /// result passes [`validate_update`]. A panicking mutator commits nothing
    /// and is reported as an invariant violation, so the lock is never
    /// poisoned by caller code. Terminal records reject every update.
    pub fn update<F>(&self, id: &WorkflowId, mutator: F) -> RegistryResult<Workflow>
    where
        F: FnOnce(&mut Workflow),
    {
        let mut entries = self.write()?;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;

        let current = &entry.workflow;
        if current.is_terminal() {
            return Err(RegistryError::TerminalState {
                id: id.clone(),
                status: current.status,
            });
        }

        let mut next = current.clone();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| mutator(&mut next))) {
            let reason = format!("update panicked: {}", panic_message(payload.as_ref()));
            warn!(workflow_id = %id, %reason, "Discarded workflow update");
            return Err(RegistryError::InvariantViolation {
                id: id.clone(),
                reason,
            });
        }

        if let Err(err) = validate_update(current, &next) {
            warn!(workflow_id = %id, error = %err, "Rejected workflow update");
            return Err(err);
        }

        let now = Utc::now();
        if next.status != current.status {
            if next.status == WorkflowStatus::Running && next.started_at.is_none() {
                next.started_at = Some(now);
            }
            if next.status.is_terminal() && next.ended_at.is_none() {
                next.ended_at = Some(now);
            }
            debug!(
                workflow_id = %id,
                from = %current.status,
                to = %next.status,
                "Workflow transition"
            );
        }

        let status = next.status;
        let status_changed = status != current.status;
        entry.workflow = next.clone();
        if status_changed {
            entry.status_tx.send_replace(status);
        }
        Ok(next)
    }

    pub fn get(&self, id: &WorkflowId) -> RegistryResult<Workflow> {
        self.read()?
            .get(id)
            .map(|e| e.workflow.clone())
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Consistent snapshot of every record, oldest first.
    pub fn list(&self) -> RegistryResult<Vec<Workflow>> {
        let mut all: Vec<Workflow> = self
            .read()?
            .values()
            .map(|e| e.workflow.clone())
            .collect();
        all.sort_by_key(|w| w.seq);
        Ok(all)
    }

    /// Status change notifications for one workflow.
    ///
    /// The receiver's current value is the status at subscription time. The
    /// channel closes when the record is evicted.
    pub fn watch(&self, id: &WorkflowId) -> RegistryResult<watch::Receiver<WorkflowStatus>> {
        self.read()?
            .get(id)
            .map(|e| e.status_tx.subscribe())
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Remove a terminal record and return it.
    pub fn evict(&self, id: &WorkflowId) -> RegistryResult<Workflow> {
        let mut entries = self.write()?;
        let status = entries
            .get(id)
            .map(|e| e.workflow.status)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        if !status.is_terminal() {
            return Err(RegistryError::StillActive {
                id: id.clone(),
                status,
            });
        }
        let entry = entries
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        debug!(workflow_id = %id, "Workflow evicted");
        Ok(entry.workflow)
    }

    /// Evict every terminal record that ended more than `older_than` ago.
    pub fn prune_finished(&self, older_than: chrono::Duration) -> RegistryResult<usize> {
        let cutoff = Utc::now() - older_than;
        let mut entries = self.write()?;
        let before = entries.len();
        entries.retain(|_, e| {
            let wf = &e.workflow;
            !(wf.is_terminal() && wf.ended_at.is_some_and(|t| t <= cutoff))
        });
        let pruned = before - entries.len();
        if pruned > 0 {
            debug!(pruned, "Pruned finished workflows");
        }
        Ok(pruned)
    }

    pub fn len(&self) -> RegistryResult<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> RegistryResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Check a proposed record against the current one.
fn validate_update(current: &Workflow, next: &Workflow) -> RegistryResult<()> {
    let id = &current.id;
    let violation = |reason: &str| RegistryError::InvariantViolation {
        id: id.clone(),
        reason: reason.to_string(),
    };

    if next.id != current.id
        || next.seq != current.seq
        || next.description != current.description
        || next.purpose != current.purpose
        || next.max_levels != current.max_levels
        || next.created_at != current.created_at
    {
        return Err(violation("immutable field changed"));
    }

    if next.status != current.status && !current.status.can_transition_to(next.status) {
        return Err(RegistryError::IllegalTransition {
            id: id.clone(),
            from: current.status,
            to: next.status,
        });
    }

    if current.name.is_some() && next.name != current.name {
        return Err(violation("name is set once"));
    }

    if next.attempts.len() < current.attempts.len()
        || next.attempts[..current.attempts.len()] != current.attempts[..]
    {
        return Err(violation("attempts are append-only"));
    }

    let completed = next.status == WorkflowStatus::Completed;
    if next.result.is_some() != completed {
        return Err(violation("result is set exactly when COMPLETED"));
    }
    let failed = next.status == WorkflowStatus::Failed;
    if next.error.is_some() != failed {
        return Err(violation("error is set exactly when FAILED"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::WorkflowFailure;

    fn running(registry: &WorkflowRegistry) -> WorkflowId {
        let id = registry.create("build a thing", "coding", 4).unwrap();
        registry
            .update(&id, |w| w.status = WorkflowStatus::Naming)
            .unwrap();
        registry
            .update(&id, |w| {
                w.name = Some("build-a-thing".into());
                w.status = WorkflowStatus::Running;
            })
            .unwrap();
        id
    }

    #[test]
    fn create_registers_queued_record() {
        let registry = WorkflowRegistry::new();
        let id = registry.create("  parse csv  ", "coding", 2).unwrap();
        let wf = registry.get(&id).unwrap();
        assert_eq!(wf.status, WorkflowStatus::Queued);
        assert_eq!(wf.description, "parse csv");
        assert!(wf.name.is_none() && wf.result.is_none() && wf.error.is_none());
        assert_eq!(registry.len().unwrap(), 1);
    }

    #[test]
    fn empty_description_creates_nothing() {
        let registry = WorkflowRegistry::new();
        let err = registry.create("   ", "coding", 4).unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
        assert!(registry.is_empty().unwrap());
    }

    #[test]
    fn ids_are_unique_and_ordered() {
        let registry = WorkflowRegistry::new();
        let a = registry.create("a", "coding", 1).unwrap();
        let b = registry.create("b", "coding", 1).unwrap();
        assert_ne!(a, b);
        let listed: Vec<_> = registry.list().unwrap().into_iter().map(|w| w.id).collect();
        assert_eq!(listed, vec![a, b]);
    }

    #[test]
    fn skipping_naming_is_rejected() {
        let registry = WorkflowRegistry::new();
        let id = registry.create("x", "coding", 1).unwrap();
        let err = registry
            .update(&id, |w| w.status = WorkflowStatus::Running)
            .unwrap_err();
        assert!(matches!(err, RegistryError::IllegalTransition { .. }));
        assert_eq!(registry.get(&id).unwrap().status, WorkflowStatus::Queued);
    }

    #[test]
    fn running_stamps_start_and_terminal_stamps_end() {
        let registry = WorkflowRegistry::new();
        let id = running(&registry);
        assert!(registry.get(&id).unwrap().started_at.is_some());

        let done = registry
            .update(&id, |w| {
                w.status = WorkflowStatus::Completed;
                w.result = Some("ok".into());
            })
            .unwrap();
        assert!(done.ended_at.is_some());
        assert!(done.ended_at >= done.started_at);
    }

    #[test]
    fn completed_without_result_is_rejected() {
        let registry = WorkflowRegistry::new();
        let id = running(&registry);
        let err = registry
            .update(&id, |w| w.status = WorkflowStatus::Completed)
            .unwrap_err();
        assert_eq!(err.code(), "INVARIANT_VIOLATION");
        assert_eq!(registry.get(&id).unwrap().status, WorkflowStatus::Running);
    }

    #[test]
    fn failed_requires_error() {
        let registry = WorkflowRegistry::new();
        let id = running(&registry);
        assert!(registry
            .update(&id, |w| {
                w.status = WorkflowStatus::Failed;
                w.result = Some("nope".into());
            })
            .is_err());
        registry
            .update(&id, |w| {
                w.status = WorkflowStatus::Failed;
                w.error = Some(WorkflowFailure::new("X", "bad"));
            })
            .unwrap();
    }

    #[test]
    fn terminal_records_are_frozen() {
        let registry = WorkflowRegistry::new();
        let id = running(&registry);
        registry
            .update(&id, |w| {
                w.status = WorkflowStatus::Completed;
                w.result = Some("ok".into());
            })
            .unwrap();

        let first = registry.get(&id).unwrap();
        let err = registry
            .update(&id, |w| w.progress = Some("late".into()))
            .unwrap_err();
        assert!(matches!(err, RegistryError::TerminalState { .. }));
        assert_eq!(registry.get(&id).unwrap(), first);
        assert_eq!(registry.get(&id).unwrap(), first);
    }

    #[test]
    fn name_is_set_once() {
        let registry = WorkflowRegistry::new();
        let id = running(&registry);
        let err = registry
            .update(&id, |w| w.name = Some("other".into()))
            .unwrap_err();
        assert_eq!(err.code(), "INVARIANT_VIOLATION");
    }

    #[test]
    fn immutable_fields_are_protected() {
        let registry = WorkflowRegistry::new();
        let id = registry.create("original", "coding", 1).unwrap();
        assert!(registry
            .update(&id, |w| w.description = "changed".into())
            .is_err());
        assert!(registry.update(&id, |w| w.purpose = "content".into()).is_err());
    }

    #[test]
    fn unknown_id_is_not_found() {
        let registry = WorkflowRegistry::new();
        let id = WorkflowId::from("wf-missing");
        assert_eq!(
            registry.get(&id).unwrap_err(),
            RegistryError::NotFound(id.clone())
        );
        assert!(registry.update(&id, |_| {}).is_err());
        assert!(registry.watch(&id).is_err());
    }

    #[test]
    fn evict_only_terminal() {
        let registry = WorkflowRegistry::new();
        let id = running(&registry);
        assert!(matches!(
            registry.evict(&id),
            Err(RegistryError::StillActive { .. })
        ));

        registry
            .update(&id, |w| {
                w.status = WorkflowStatus::Failed;
                w.error = Some(WorkflowFailure::new("X", "bad"));
            })
            .unwrap();
        let evicted = registry.evict(&id).unwrap();
        assert_eq!(evicted.status, WorkflowStatus::Failed);
        assert!(registry.is_empty().unwrap());
    }

    #[test]
    fn prune_keeps_active_and_recent() {
        let registry = WorkflowRegistry::new();
        let active = registry.create("active", "coding", 1).unwrap();
        let done = running(&registry);
        registry
            .update(&done, |w| {
                w.status = WorkflowStatus::Completed;
                w.result = Some("ok".into());
            })
            .unwrap();

        assert_eq!(registry.prune_finished(chrono::Duration::hours(1)).unwrap(), 0);
        assert_eq!(registry.prune_finished(chrono::Duration::zero()).unwrap(), 1);
        assert!(registry.get(&active).is_ok());
        assert!(registry.get(&done).is_err());
    }

    #[test]
    fn watch_sees_transitions() {
        let registry = WorkflowRegistry::new();
        let id = registry.create("x", "coding", 1).unwrap();
        let rx = registry.watch(&id).unwrap();
        assert_eq!(*rx.borrow(), WorkflowStatus::Queued);
        registry
            .update(&id, |w| w.status = WorkflowStatus::Naming)
            .unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), WorkflowStatus::Naming);
    }

    #[test]
    fn panicking_update_commits_nothing_and_keeps_registry_usable() {
        let registry = WorkflowRegistry::new();
        let broken = registry.create("first task", "coding", 1).unwrap();
        let other = registry.create("second task", "coding", 1).unwrap();

        let err = registry
            .update(&broken, |w| {
                w.status = WorkflowStatus::Naming;
                panic!("bad mutator");
            })
            .unwrap_err();
        assert_eq!(err.code(), "INVARIANT_VIOLATION");
        assert!(err.to_string().contains("bad mutator"), "{err}");

        assert_eq!(registry.get(&broken).unwrap().status, WorkflowStatus::Queued);
        let updated = registry
            .update(&other, |w| w.status = WorkflowStatus::Naming)
            .unwrap();
        assert_eq!(updated.status, WorkflowStatus::Naming);
        assert_eq!(registry.len().unwrap(), 2);
        assert_eq!(registry.list().unwrap().len(), 2);

        // The record that panicked can still move forward.
        registry
            .update(&broken, |w| w.status = WorkflowStatus::Naming)
            .unwrap();
    }

    #[test]
    fn panic_messages_are_extracted() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "unknown panic");
    }
}
