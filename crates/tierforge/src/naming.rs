use std::time::Duration;

use async_trait::async_trait;
use coordination::{sanitize_slug, NamingError, SharedInvoker, WorkflowNamer};
use tracing::debug;

const NAMING_PROMPT: &str = "Give this task a short name: 2 to 4 lowercase words joined by \
hyphens. Reply with the name only.\n\nTask: ";

/// Names workflows by asking a (small) model for a slug.
pub struct LlmNamer {
    invoker: SharedInvoker,
    model: String,
    timeout: Duration,
}

impl LlmNamer {
    pub fn new(invoker: SharedInvoker, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            invoker,
            model: model.into(),
            timeout,
        }
    }
}

#[async_trait]
impl WorkflowNamer for LlmNamer {
    async fn name(&self, description: &str) -> Result<String, NamingError> {
        let prompt = format!("{NAMING_PROMPT}{description}");
        let raw = self
            .invoker
            .invoke(&self.model, &prompt, self.timeout)
            .await
            .map_err(|e| NamingError::Failed(e.to_string()))?;

        // Models like to wrap the answer; only the first line counts.
        let first = raw.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
        let slug = sanitize_slug(first).ok_or_else(|| NamingError::Empty(raw.clone()))?;
        debug!(model = %self.model, slug = %slug, "Namer answered");
        Ok(slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::{InvokeError, ModelInvoker};
    use mockall::mock;
    use std::sync::Arc;

    mock! {
        Backend {}

        #[async_trait]
        impl ModelInvoker for Backend {
            async fn invoke(
                &self,
                model_spec: &str,
                prompt: &str,
                timeout: Duration,
            ) -> Result<String, InvokeError>;
        }
    }

    fn namer(backend: MockBackend) -> LlmNamer {
        LlmNamer::new(Arc::new(backend), "local:tiny", Duration::from_secs(3))
    }

    #[tokio::test]
    async fn sanitizes_model_answer() {
        let mut backend = MockBackend::new();
        backend
            .expect_invoke()
            .times(1)
            .returning(|model, prompt, timeout| {
                assert_eq!(model, "local:tiny");
                assert_eq!(timeout, Duration::from_secs(3));
                assert!(prompt.ends_with("Task: check email syntax"));
                Ok("\n`Email Syntax Check`\nBecause the task...".to_string())
            });

        let slug = namer(backend).name("check email syntax").await.unwrap();
        assert_eq!(slug, "email-syntax-check");
    }

    #[tokio::test]
    async fn backend_failure_is_naming_failure() {
        let mut backend = MockBackend::new();
        backend
            .expect_invoke()
            .returning(|_, _, _| Err(InvokeError::Transport("connection refused".into())));

        let err = namer(backend).name("anything").await.unwrap_err();
        assert!(matches!(err, NamingError::Failed(msg) if msg.contains("connection refused")));
    }

    #[tokio::test]
    async fn unusable_answer_is_empty_error() {
        let mut backend = MockBackend::new();
        backend
            .expect_invoke()
            .returning(|_, _, _| Ok("???".to_string()));

        let err = namer(backend).name("anything").await.unwrap_err();
        assert!(matches!(err, NamingError::Empty(_)));
    }
}
