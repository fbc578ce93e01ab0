//! Model backends: `provider:model` specs, the OpenAI-compatible HTTP
//! invoker and an offline stub.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use coordination::{InvokeError, ModelInvoker};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::{BackendEndpoint, BackendsConfig};

/// Longest slice of an error body carried into an attempt's detail.
const BODY_SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Local,
    Cloud,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Cloud => write!(f, "cloud"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelSpecError {
    #[error("empty model spec")]
    Empty,

    #[error("unknown provider {0:?} (expected local or cloud)")]
    UnknownProvider(String),
}

/// Parsed `"<provider>:<model>"`. A bare model name means `local`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub provider: Provider,
    pub model: String,
}

impl FromStr for ModelSpec {
    type Err = ModelSpecError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let (provider, model) = match raw.split_once(':') {
            Some(("local", model)) => (Provider::Local, model),
            Some(("cloud", model)) => (Provider::Cloud, model),
            Some((other, _)) => return Err(ModelSpecError::UnknownProvider(other.to_string())),
            None => (Provider::Local, raw),
        };
        let model = model.trim();
        if model.is_empty() {
            return Err(ModelSpecError::Empty);
        }
        Ok(Self {
            provider,
            model: model.to_string(),
        })
    }
}

impl std::fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// Invoker for OpenAI-compatible `/chat/completions` endpoints.
///
/// One shared `reqwest::Client` serves every workflow task.
pub struct HttpInvoker {
    client: reqwest::Client,
    backends: BackendsConfig,
}

impl HttpInvoker {
    pub fn new(backends: BackendsConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tierforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        Ok(Self { client, backends })
    }

    fn endpoint(&self, provider: Provider) -> &BackendEndpoint {
        match provider {
            Provider::Local => &self.backends.local,
            Provider::Cloud => &self.backends.cloud,
        }
    }
}

#[async_trait]
impl ModelInvoker for HttpInvoker {
    async fn invoke(
        &self,
        model_spec: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, InvokeError> {
        let spec: ModelSpec = model_spec
            .parse()
            .map_err(|e: ModelSpecError| InvokeError::Rejected(e.to_string()))?;
        let endpoint = self.endpoint(spec.provider);
        let url = format!("{}/chat/completions", endpoint.url.trim_end_matches('/'));

        let body = json!({
            "model": spec.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let mut request = self.client.post(&url).timeout(timeout).json(&body);
        if let Some(key) = &endpoint.api_key {
            request = request.bearer_auth(key);
        }

        debug!(%url, model = %spec.model, "Sending completion request");
        let response = request
            .send()
            .await
            .map_err(|e| classify_reqwest(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &text));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| classify_reqwest(e, timeout))?;
        extract_completion(&payload)
    }
}

fn classify_reqwest(err: reqwest::Error, timeout: Duration) -> InvokeError {
    if err.is_timeout() {
        InvokeError::Timeout(timeout)
    } else if err.is_decode() {
        InvokeError::Transport(format!("malformed response: {err}"))
    } else {
        InvokeError::Transport(err.to_string())
    }
}

/// Map a non-success HTTP status to an attempt failure.
///
/// Server errors, throttling and request timeouts are transport problems;
/// every other 4xx means the backend declined the request.
pub fn classify_status(status: u16, body: &str) -> InvokeError {
    let snippet: String = body.trim().chars().take(BODY_SNIPPET_CHARS).collect();
    let detail = if snippet.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {snippet}")
    };
    match status {
        408 | 429 | 500..=599 => InvokeError::Transport(detail),
        _ => InvokeError::Rejected(detail),
    }
}

/// Pull the completion text out of a `/chat/completions` response.
pub fn extract_completion(payload: &Value) -> Result<String, InvokeError> {
    let choice = payload
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| InvokeError::Transport("malformed response: no choices".into()))?;

    if choice.get("finish_reason").and_then(Value::as_str) == Some("content_filter") {
        return Err(InvokeError::Rejected("content filtered".into()));
    }

    let message = &choice["message"];
    if let Some(refusal) = message.get("refusal").and_then(Value::as_str) {
        if !refusal.trim().is_empty() {
            return Err(InvokeError::Rejected(format!("refused: {}", refusal.trim())));
        }
    }

    match message.get("content").and_then(Value::as_str) {
        Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
        _ => Err(InvokeError::Rejected("empty completion".into())),
    }
}

/// Answers locally with a deterministic stub. Used with `--offline`.
#[derive(Debug, Default, Clone)]
pub struct OfflineInvoker;

#[async_trait]
impl ModelInvoker for OfflineInvoker {
    async fn invoke(
        &self,
        model_spec: &str,
        prompt: &str,
        _timeout: Duration,
    ) -> Result<String, InvokeError> {
        let task = prompt.lines().next().unwrap_or_default().trim();
        Ok(format!(
            "// offline draft from {model_spec}\n\
             // task: {task}\n\
             fn todo() {{\n    unimplemented!()\n}}\n"
        ))
    }
}
