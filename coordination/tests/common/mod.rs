//! Shared fixtures for coordination integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coordination::{
    CatalogConfig, EscalationEngine, InvokeError, ModelInvoker, SchedulerConfig, TierCatalog,
    TierConfig, WorkflowRegistry, WorkflowScheduler,
};
use tokio::sync::Notify;

/// Installs a test-friendly subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("coordination=debug")
        .with_test_writer()
        .try_init();
}

/// Two notifications used to hold an invocation open.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

/// What a scripted model does when invoked.
#[derive(Clone)]
pub enum Behavior {
    Reply(String),
    Reject(String),
    Transport(String),
    /// Never answers; only the engine's tier timeout ends the call.
    Hang,
    /// Signals `entered`, waits for `release`, then replies.
    Gated(Arc<Gate>, String),
    /// Sleeps, then replies.
    Slow(Duration, String),
}

/// In-process backend keyed by model spec.
#[derive(Default)]
pub struct ScriptedInvoker {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<Vec<(String, String)>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, model: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(model.to_string(), behavior);
        self
    }

    /// `(model, prompt)` for every call, in order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, model: &str) -> usize {
        self.calls().iter().filter(|(m, _)| m == model).count()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        model_spec: &str,
        prompt: &str,
        _timeout: Duration,
    ) -> Result<String, InvokeError> {
        self.calls
            .lock()
            .unwrap()
            .push((model_spec.to_string(), prompt.to_string()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let behavior = self
            .behaviors
            .get(model_spec)
            .cloned()
            .unwrap_or_else(|| Behavior::Transport(format!("no route to {model_spec}")));
        let result = match behavior {
            Behavior::Reply(text) => Ok(text),
            Behavior::Reject(reason) => Err(InvokeError::Rejected(reason)),
            Behavior::Transport(reason) => Err(InvokeError::Transport(reason)),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Behavior::Gated(gate, text) => {
                gate.entered.notify_one();
                gate.release.notified().await;
                Ok(text)
            }
            Behavior::Slow(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// A single purpose whose tiers use models `<prefix>1..=<prefix>n`, chained.
pub fn ladder(purpose: &str, prefix: &str, n: u32, timeout_secs: u64) -> CatalogConfig {
    let tiers = (1..=n)
        .map(|level| {
            let tier = TierConfig::new(level, &format!("{prefix}{level}"), 100_000, timeout_secs);
            if level < n {
                tier.escalates_to(level + 1)
            } else {
                tier
            }
        })
        .collect();
    CatalogConfig::default().with_purpose(purpose, tiers)
}

pub fn engine(config: &CatalogConfig, invoker: Arc<ScriptedInvoker>) -> Arc<EscalationEngine> {
    let catalog = Arc::new(TierCatalog::from_config(config).expect("valid catalog"));
    Arc::new(EscalationEngine::new(catalog, invoker))
}

pub fn scheduler(
    config: &CatalogConfig,
    invoker: Arc<ScriptedInvoker>,
    max_concurrent: usize,
) -> WorkflowScheduler {
    let purpose = config
        .purposes
        .keys()
        .next()
        .cloned()
        .expect("at least one purpose");
    WorkflowScheduler::new(
        Arc::new(WorkflowRegistry::new()),
        engine(config, invoker),
        SchedulerConfig {
            max_concurrent,
            default_purpose: purpose,
            naming_timeout_secs: 1,
            ..SchedulerConfig::default()
        },
    )
    .expect("valid scheduler")
}
