//! Workflow Scheduler
//!
//! `submit` registers a QUEUED record and returns immediately; the workflow
//! then runs on its own task:
//!
//! ```text
//! submit ─▶ QUEUED ─(permit)─▶ NAMING ─(name | fallback)─▶ RUNNING ─▶ COMPLETED
//!                                                              └────▶ FAILED
//! ```
//!
//! A semaphore caps how many workflows run at once; the rest wait in QUEUED.
//! Each task body is wrapped so that an error or panic becomes a FAILED
//! record for that workflow alone.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::naming::{fallback_slug, sanitize_slug, NamingError, WorkflowNamer};
use super::registry::{panic_message, RegistryError, RegistryResult, WorkflowRegistry};
use super::types::{Workflow, WorkflowFailure, WorkflowId, WorkflowStatus};
use crate::escalation::{Attempt, AttemptOutcome, EscalationEngine, EscalationListener};
use crate::events::{
    ProgressEvent, ProgressFilter, ProgressKind, ProgressReporter, ProgressSubscription,
    SharedProgressReporter,
};
use crate::tiers::{CatalogError, Tier, TierRef};

/// Shared reference to a WorkflowNamer
pub type SharedNamer = Arc<dyn WorkflowNamer>;

/// Failure code for errors caught at the task boundary.
pub const INTERNAL_FAILURE: &str = "INTERNAL";

/// Scheduler tuning, usually read from the `[scheduler]` config section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on workflows past QUEUED at the same time
    pub max_concurrent: usize,
    pub naming_timeout_secs: u64,
    /// Purpose used when a request does not name one
    pub default_purpose: String,
    pub default_max_levels: u32,
    /// Per-subscriber progress queue capacity
    pub subscriber_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            naming_timeout_secs: 5,
            default_purpose: "coding".to_string(),
            default_max_levels: 4,
            subscriber_buffer: crate::events::DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

impl SchedulerConfig {
    pub fn naming_timeout(&self) -> Duration {
        Duration::from_secs(self.naming_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        let invalid = |msg: &str| Err(SchedulerError::InvalidConfig(msg.to_string()));
        if self.max_concurrent == 0 {
            return invalid("max_concurrent must be at least 1");
        }
        if self.naming_timeout_secs == 0 {
            return invalid("naming_timeout_secs must be at least 1");
        }
        if self.default_max_levels == 0 {
            return invalid("default_max_levels must be at least 1");
        }
        if self.subscriber_buffer == 0 {
            return invalid("subscriber_buffer must be at least 1");
        }
        if self.default_purpose.trim().is_empty() {
            return invalid("default_purpose must not be empty");
        }
        Ok(())
    }
}

/// One generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRequest {
    pub description: String,
    pub purpose: Option<String>,
    pub max_levels: Option<u32>,
}

impl WorkflowRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            purpose: None,
            max_levels: None,
        }
    }

    pub fn purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn max_levels(mut self, max_levels: u32) -> Self {
        self.max_levels = Some(max_levels);
        self
    }
}

#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid scheduler config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Timed out after {waited:?} waiting for {id} (still {status})")]
    AwaitTimeout {
        id: WorkflowId,
        waited: Duration,
        status: WorkflowStatus,
    },
}

impl SchedulerError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Catalog(e) => e.code(),
            Self::Registry(e) => e.code(),
            Self::AwaitTimeout { .. } => "AWAIT_TIMEOUT",
        }
    }
}

type CancelMap = Arc<Mutex<HashMap<WorkflowId, CancellationToken>>>;

fn lock_cancels(
    cancels: &Mutex<HashMap<WorkflowId, CancellationToken>>,
) -> MutexGuard<'_, HashMap<WorkflowId, CancellationToken>> {
    cancels.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs workflows in the background and answers queries about them.
pub struct WorkflowScheduler {
    registry: Arc<WorkflowRegistry>,
    reporter: SharedProgressReporter,
    engine: Arc<EscalationEngine>,
    namer: Option<SharedNamer>,
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
    cancels: CancelMap,
    tracker: TaskTracker,
}

impl WorkflowScheduler {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        engine: Arc<EscalationEngine>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        engine.catalog().resolve(&config.default_purpose, None)?;
        let reporter = ProgressReporter::with_buffer(registry.clone(), config.subscriber_buffer);
        Ok(Self {
            registry,
            reporter,
            engine,
            namer: None,
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            config,
            cancels: Arc::new(Mutex::new(HashMap::new())),
            tracker: TaskTracker::new(),
        })
    }

    /// Use `namer` for the NAMING step. Without one every workflow gets the
    /// fallback slug.
    pub fn with_namer(mut self, namer: SharedNamer) -> Self {
        self.namer = Some(namer);
        self
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    pub fn reporter(&self) -> &SharedProgressReporter {
        &self.reporter
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Submit with the default purpose and level cap.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, description: &str) -> Result<WorkflowId, SchedulerError> {
        self.submit_request(WorkflowRequest::new(description))
    }

    /// Validate, register and dispatch. Never waits on the workflow.
    pub fn submit_request(&self, request: WorkflowRequest) -> Result<WorkflowId, SchedulerError> {
        let description = request.description.trim();
        if description.is_empty() {
            return Err(SchedulerError::InvalidRequest(
                "description must not be empty".to_string(),
            ));
        }
        let purpose = request
            .purpose
            .unwrap_or_else(|| self.config.default_purpose.clone());
        let max_levels = request.max_levels.unwrap_or(self.config.default_max_levels);
        if max_levels == 0 {
            return Err(SchedulerError::InvalidRequest(
                "max_levels must be at least 1".to_string(),
            ));
        }
        self.engine.catalog().resolve(&purpose, None)?;

        let id = self.registry.create(description, &purpose, max_levels)?;
        let token = CancellationToken::new();
        lock_cancels(&self.cancels).insert(id.clone(), token.clone());

        self.reporter.publish(&id, "queued");
        info!(workflow_id = %id, purpose = %purpose, max_levels, "Workflow submitted");

        let task = WorkflowTask {
            id: id.clone(),
            registry: self.registry.clone(),
            reporter: self.reporter.clone(),
            engine: self.engine.clone(),
            namer: self.namer.clone(),
            naming_timeout: self.config.naming_timeout(),
            permits: self.permits.clone(),
            cancels: self.cancels.clone(),
            token,
        };
        let span = info_span!("workflow", workflow_id = %id, purpose = %purpose);
        self.tracker.spawn(task.run().instrument(span));
        Ok(id)
    }

    /// Request cooperative cancellation.
    ///
    /// Returns false when the workflow is unknown or already finished. The
    /// running attempt, if any, is allowed to resolve first.
    pub fn cancel(&self, id: &WorkflowId) -> bool {
        let token = lock_cancels(&self.cancels).get(id).cloned();
        match token {
            Some(token) => {
                if !token.is_cancelled() {
                    token.cancel();
                    info!(workflow_id = %id, "Cancellation requested");
                    self.reporter.publish(id, "cancellation requested");
                }
                true
            }
            None => false,
        }
    }

    /// Wait until the workflow is terminal or `timeout` elapses.
    ///
    /// Only the caller waits; other workflows are unaffected.
    pub async fn await_completion(
        &self,
        id: &WorkflowId,
        timeout: Duration,
    ) -> Result<Workflow, SchedulerError> {
        let mut rx = self.registry.watch(id)?;
        let terminal = async {
            loop {
                if rx.borrow_and_update().is_terminal() {
                    return;
                }
                // Sender dropped means the record was evicted.
                if rx.changed().await.is_err() {
                    return;
                }
            }
        };

        match tokio::time::timeout(timeout, terminal).await {
            Ok(()) => Ok(self.registry.get(id)?),
            Err(_) => {
                let status = self.registry.get(id)?.status;
                Err(SchedulerError::AwaitTimeout {
                    id: id.clone(),
                    waited: timeout,
                    status,
                })
            }
        }
    }

    pub fn get(&self, id: &WorkflowId) -> Result<Workflow, SchedulerError> {
        Ok(self.registry.get(id)?)
    }

    pub fn list(&self) -> Result<Vec<Workflow>, SchedulerError> {
        Ok(self.registry.list()?)
    }

    pub fn subscribe(&self) -> ProgressSubscription {
        self.reporter.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: ProgressFilter) -> ProgressSubscription {
        self.reporter.subscribe_filtered(filter)
    }

    /// Workflows that have not reached a terminal state.
    pub fn active_count(&self) -> usize {
        lock_cancels(&self.cancels).len()
    }

    /// Wait for every workflow submitted so far to finish and for its
    /// progress events to reach subscribers.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
        self.reporter.flush().await;
    }

    /// Cancel everything in flight, then drain.
    pub async fn shutdown(&self) {
        let tokens: Vec<CancellationToken> =
            lock_cancels(&self.cancels).values().cloned().collect();
        for token in &tokens {
            token.cancel();
        }
        if !tokens.is_empty() {
            info!(count = tokens.len(), "Cancelling in-flight workflows");
        }
        self.drain().await;
    }
}

/// How the task body ended
enum Terminal {
    Completed {
        output: String,
        tier: TierRef,
        attempts: Vec<Attempt>,
    },
    Failed {
        failure: WorkflowFailure,
        attempts: Vec<Attempt>,
    },
}

/// Everything one workflow task needs; owned by the spawned future.
struct WorkflowTask {
    id: WorkflowId,
    registry: Arc<WorkflowRegistry>,
    reporter: SharedProgressReporter,
    engine: Arc<EscalationEngine>,
    namer: Option<SharedNamer>,
    naming_timeout: Duration,
    permits: Arc<Semaphore>,
    cancels: CancelMap,
    token: CancellationToken,
}

impl WorkflowTask {
    async fn run(self) {
        let terminal = match AssertUnwindSafe(self.drive()).catch_unwind().await {
            Ok(Ok(terminal)) => terminal,
            Ok(Err(err)) => {
                error!(error = %err, "Workflow task failed");
                Terminal::Failed {
                    failure: WorkflowFailure::new(err.code(), err.to_string()),
                    attempts: Vec::new(),
                }
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!(panic = %msg, "Workflow task panicked");
                Terminal::Failed {
                    failure: WorkflowFailure::new(
                        INTERNAL_FAILURE,
                        format!("task panicked: {}", msg),
                    ),
                    attempts: Vec::new(),
                }
            }
        };
        // Unregister first so `cancel` never reports success on a finished
        // workflow.
        lock_cancels(&self.cancels).remove(&self.id);
        self.finish(terminal);
    }

    async fn drive(&self) -> RegistryResult<Terminal> {
        let permit = tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            permit = self.permits.clone().acquire_owned() => Some(permit),
        };
        let _permit = match permit {
            Some(Ok(permit)) => permit,
            Some(Err(_)) => {
                return Ok(Terminal::Failed {
                    failure: WorkflowFailure::new(INTERNAL_FAILURE, "worker pool closed"),
                    attempts: Vec::new(),
                })
            }
            None => {
                info!("Cancelled while queued");
                return Ok(Terminal::Failed {
                    failure: WorkflowFailure::cancelled(&[]),
                    attempts: Vec::new(),
                });
            }
        };

        let workflow = self.transition(WorkflowStatus::Naming, None, "naming")?;
        let name = self.resolve_name(&workflow).await;
        let message = format!("running as {}", name);
        self.transition(WorkflowStatus::Running, Some(name), &message)?;

        let listener = AttemptReporter {
            id: &self.id,
            registry: &self.registry,
            reporter: &self.reporter,
        };
        let result = self
            .engine
            .run_with(
                &workflow.purpose,
                &workflow.description,
                workflow.max_levels,
                &self.token,
                &listener,
            )
            .await;

        Ok(match result {
            Ok(success) => Terminal::Completed {
                output: success.output,
                tier: success.tier,
                attempts: success.attempts,
            },
            Err(err) => Terminal::Failed {
                failure: WorkflowFailure::from_escalation(&err),
                attempts: err.attempts().to_vec(),
            },
        })
    }

    fn transition(
        &self,
        status: WorkflowStatus,
        name: Option<String>,
        message: &str,
    ) -> RegistryResult<Workflow> {
        let workflow = self.registry.update(&self.id, |w| {
            w.status = status;
            if name.is_some() {
                w.name = name;
            }
        })?;
        // The pump records the progress line, in order with attempt events.
        self.reporter.publish_event(ProgressEvent::new(
            self.id.clone(),
            ProgressKind::Status,
            message,
        ));
        Ok(workflow)
    }

    /// Namer result, or the fallback slug on failure, timeout or cancellation.
    async fn resolve_name(&self, workflow: &Workflow) -> String {
        let fallback = || fallback_slug(&workflow.description, workflow.seq);
        let Some(namer) = &self.namer else {
            return fallback();
        };
        if self.token.is_cancelled() {
            return fallback();
        }

        let outcome = match tokio::time::timeout(
            self.naming_timeout,
            namer.name(&workflow.description),
        )
        .await
        {
            Ok(Ok(raw)) => sanitize_slug(&raw).ok_or(NamingError::Empty(raw)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(NamingError::TimedOut(self.naming_timeout)),
        };

        match outcome {
            Ok(name) => {
                debug!(name = %name, "Workflow named");
                name
            }
            Err(err) => {
                let name = fallback();
                warn!(error = %err, fallback = %name, "Naming failed, using fallback");
                name
            }
        }
    }

    /// Record the terminal state, walking any skipped lifecycle steps first.
    fn finish(&self, terminal: Terminal) {
        if let Err(err) = self.walk_to_running() {
            error!(error = %err, "Could not advance workflow to RUNNING");
        }

        let (message, succeeded) = match &terminal {
            Terminal::Completed { tier, attempts, .. } => (
                format!(
                    "completed on {} after {} attempt(s)",
                    tier.label(),
                    attempts.len()
                ),
                true,
            ),
            Terminal::Failed { failure, .. } if failure.is_cancelled() => {
                ("cancelled".to_string(), false)
            }
            Terminal::Failed { failure, .. } => (format!("failed: {}", failure.reason), false),
        };

        let progress = message.clone();
        let committed = self.registry.update(&self.id, move |w| {
            w.progress = Some(progress);
            let attempts = match terminal {
                Terminal::Completed {
                    output, attempts, ..
                } => {
                    w.status = WorkflowStatus::Completed;
                    w.result = Some(output);
                    attempts
                }
                Terminal::Failed { failure, attempts } => {
                    w.status = WorkflowStatus::Failed;
                    w.error = Some(failure);
                    attempts
                }
            };
            // Attempts normally arrive one by one through the listener.
            if attempts.len() > w.attempts.len() {
                w.attempts = attempts;
            }
            // Failures raised outside the engine know nothing of attempts.
            if let Some(failure) = w.error.as_mut() {
                if failure.final_tier.is_none() {
                    failure.final_tier = w.attempts.last().map(|a| a.tier.clone());
                }
                failure.attempt_count = failure.attempt_count.max(w.attempts.len());
            }
        });

        match committed {
            Ok(workflow) => {
                if succeeded {
                    info!(attempts = workflow.attempts.len(), "Workflow completed");
                } else if let Some(failure) = &workflow.error {
                    warn!(code = %failure.code, reason = %failure.reason, "Workflow failed");
                }
                self.reporter.publish_event(ProgressEvent::new(
                    self.id.clone(),
                    ProgressKind::Terminal,
                    message,
                ));
            }
            Err(err) => error!(error = %err, "Could not record terminal state"),
        }
    }

    fn walk_to_running(&self) -> RegistryResult<()> {
        loop {
            let next = match self.registry.get(&self.id)?.status {
                WorkflowStatus::Queued => WorkflowStatus::Naming,
                WorkflowStatus::Naming => WorkflowStatus::Running,
                _ => return Ok(()),
            };
            self.registry.update(&self.id, |w| {
                w.status = next;
                if next == WorkflowStatus::Running && w.name.is_none() {
                    w.name = Some(fallback_slug(&w.description, w.seq));
                }
            })?;
        }
    }
}

/// Mirrors escalation progress into the registry and the progress stream.
struct AttemptReporter<'a> {
    id: &'a WorkflowId,
    registry: &'a WorkflowRegistry,
    reporter: &'a SharedProgressReporter,
}

impl AttemptReporter<'_> {
    fn emit(&self, kind: ProgressKind, message: String) {
        self.reporter
            .publish_event(ProgressEvent::new(self.id.clone(), kind, message));
    }
}

impl EscalationListener for AttemptReporter<'_> {
    fn attempt_started(&self, tier: &Tier, number: u32) {
        self.emit(
            ProgressKind::Attempt,
            format!("attempt {} on {} ({})", number, tier.label(), tier.model_spec),
        );
    }

    fn attempt_finished(&self, attempt: &Attempt) {
        if let Err(err) = self
            .registry
            .update(self.id, |w| w.attempts.push(attempt.clone()))
        {
            warn!(error = %err, "Could not record attempt");
        }
        self.emit(
            ProgressKind::Attempt,
            format!(
                "attempt {} on {}: {}",
                attempt.number,
                attempt.tier.label(),
                attempt.outcome
            ),
        );
    }

    fn escalating(&self, _from: &Tier, to: &Tier, after: AttemptOutcome) {
        self.emit(
            ProgressKind::Escalation,
            format!("escalating to {} after {}", to.label(), after),
        );
    }
}
