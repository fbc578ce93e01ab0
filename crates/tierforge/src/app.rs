use std::sync::Arc;

use anyhow::{Context, Result};
use coordination::{
    EscalationEngine, SharedInvoker, TierCatalog, WorkflowId, WorkflowRegistry, WorkflowRequest,
    WorkflowScheduler,
};
use tracing::{info, warn};

use crate::backends::{HttpInvoker, OfflineInvoker};
use crate::config::AppConfig;
use crate::naming::LlmNamer;
use crate::sentinel::{Sentinel, Verdict};

/// Outcome of handing free text to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Accepted { id: WorkflowId, verdict: Verdict },
    Refused { verdict: Verdict },
}

/// Everything a front-end needs: the scheduler plus the input gate.
pub struct Runtime {
    pub scheduler: Arc<WorkflowScheduler>,
    pub catalog: Arc<TierCatalog>,
    pub sentinel: Sentinel,
    pub config: AppConfig,
}

impl Runtime {
    /// Wire backends, catalog, namer and scheduler from config.
    pub fn build(config: AppConfig, offline: bool) -> Result<Self> {
        let invoker: SharedInvoker = if offline {
            info!("Offline mode: answering with local stubs");
            Arc::new(OfflineInvoker)
        } else {
            Arc::new(HttpInvoker::new(config.backends.clone())?)
        };
        Self::with_invoker(config, invoker, !offline)
    }

    /// Build around a caller-supplied invoker.
    pub fn with_invoker(config: AppConfig, invoker: SharedInvoker, naming: bool) -> Result<Self> {
        let catalog = Arc::new(config.catalog()?);
        let engine = Arc::new(EscalationEngine::new(catalog.clone(), invoker.clone()));
        let mut scheduler = WorkflowScheduler::new(
            Arc::new(WorkflowRegistry::new()),
            engine,
            config.scheduler.clone(),
        )
        .context("Failed to start scheduler")?;

        if naming && config.naming.enabled {
            scheduler = scheduler.with_namer(Arc::new(LlmNamer::new(
                invoker,
                config.naming.model.clone(),
                config.scheduler.naming_timeout(),
            )));
        }

        info!(
            purposes = catalog.purposes().count(),
            max_concurrent = config.scheduler.max_concurrent,
            "Runtime ready"
        );
        Ok(Self {
            scheduler: Arc::new(scheduler),
            catalog,
            sentinel: Sentinel::default(),
            config,
        })
    }

    /// Gate `text` through the sentinel and submit it if it passes.
    pub fn submit(
        &self,
        text: &str,
        purpose: Option<&str>,
        max_levels: Option<u32>,
    ) -> Result<Submission> {
        let verdict = self.sentinel.classify(text);
        if verdict.is_refused() {
            warn!(%verdict, "Input refused");
            return Ok(Submission::Refused { verdict });
        }
        if verdict == Verdict::Vague {
            warn!(%verdict, "Submitting vague request");
        }

        let mut request = WorkflowRequest::new(text);
        if let Some(purpose) = purpose {
            request = request.purpose(purpose);
        }
        if let Some(max_levels) = max_levels {
            request = request.max_levels(max_levels);
        }
        let id = self.scheduler.submit_request(request)?;
        Ok(Submission::Accepted { id, verdict })
    }
}
