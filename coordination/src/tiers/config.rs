//! Serializable tier catalog configuration and the built-in ladders.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One tier as written in configuration (`[[tiers.<purpose>]]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Ordinal within the purpose; the ladder always starts at level 1.
    pub level: u32,
    /// Opaque model selector handed to the backend invoker.
    pub model: String,
    /// Maximum prompt size in characters.
    pub context_budget: usize,
    /// Per-invocation timeout in seconds.
    pub timeout_secs: u64,
    /// Level to escalate to when this tier fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalates_to: Option<u32>,
}

impl TierConfig {
    pub fn new(level: u32, model: &str, context_budget: usize, timeout_secs: u64) -> Self {
        Self {
            level,
            model: model.to_string(),
            context_budget,
            timeout_secs,
            escalates_to: None,
        }
    }

    pub fn escalates_to(mut self, level: u32) -> Self {
        self.escalates_to = Some(level);
        self
    }
}

/// Purpose → tiers, exactly as deserialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogConfig {
    pub purposes: BTreeMap<String, Vec<TierConfig>>,
}

impl CatalogConfig {
    /// Built-in ladders used when no tiers are configured.
    ///
    /// | Purpose      | Ladder                                        |
    /// |--------------|-----------------------------------------------|
    /// | `coding`     | 7B local → 32B local → cloud → cloud reasoning |
    /// | `content`    | 8B local → cloud                              |
    /// | `validation` | 7B local only                                 |
    pub fn builtin() -> Self {
        let mut purposes = BTreeMap::new();
        purposes.insert(
            "coding".to_string(),
            vec![
                TierConfig::new(1, "local:qwen2.5-coder-7b-instruct", 16_000, 60).escalates_to(2),
                TierConfig::new(2, "local:qwen2.5-coder-32b-instruct", 48_000, 180)
                    .escalates_to(3),
                TierConfig::new(3, "cloud:gpt-4o", 120_000, 300).escalates_to(4),
                TierConfig::new(4, "cloud:o1", 200_000, 600),
            ],
        );
        purposes.insert(
            "content".to_string(),
            vec![
                TierConfig::new(1, "local:llama3.1-8b-instruct", 16_000, 60).escalates_to(2),
                TierConfig::new(2, "cloud:gpt-4o-mini", 64_000, 120),
            ],
        );
        purposes.insert(
            "validation".to_string(),
            vec![TierConfig::new(1, "local:qwen2.5-coder-7b-instruct", 16_000, 45)],
        );
        Self { purposes }
    }

    /// Add (or replace) a purpose's ladder.
    pub fn with_purpose(mut self, purpose: &str, tiers: Vec<TierConfig>) -> Self {
        self.purposes.insert(purpose.to_string(), tiers);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.purposes.is_empty()
    }
}
