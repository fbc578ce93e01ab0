//! Tier Catalog: purpose-keyed escalation ladders
//!
//! Each purpose owns a singly-linked chain of tiers starting at level 1.
//! The catalog is validated once when built and is read-only afterwards,
//! so lookups take no locks.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::{CatalogConfig, TierConfig};

/// Upper bound on the length of any escalation chain.
pub const MAX_CHAIN_LEN: usize = 8;

/// Errors from building or querying the catalog
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Unknown purpose: {0}")]
    UnknownPurpose(String),

    #[error("Unknown tier: {purpose}/tier_{level}")]
    UnknownTier { purpose: String, level: u32 },

    #[error("Purpose '{0}' has no tier_1")]
    MissingEntryTier(String),

    #[error("Duplicate tier: {purpose}/tier_{level}")]
    DuplicateTier { purpose: String, level: u32 },

    #[error("{purpose}/tier_{from} escalates to missing tier_{to}")]
    DanglingEscalation { purpose: String, from: u32, to: u32 },

    #[error("Escalation cycle in '{purpose}' through tier_{level}")]
    Cycle { purpose: String, level: u32 },

    #[error("Escalation chain for '{purpose}' is longer than {max} tiers")]
    ChainTooLong { purpose: String, max: usize },

    #[error("Invalid tier {purpose}/tier_{level}: {reason}")]
    InvalidTier {
        purpose: String,
        level: u32,
        reason: String,
    },

    #[error("Failed to parse tier catalog: {0}")]
    Parse(String),
}

impl CatalogError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownPurpose(_) => "UNKNOWN_PURPOSE",
            Self::UnknownTier { .. } => "UNKNOWN_TIER",
            _ => "INVALID_CATALOG",
        }
    }
}

/// Stable reference to a tier: purpose plus level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TierRef {
    pub purpose: String,
    pub level: u32,
}

impl TierRef {
    pub fn new(purpose: impl Into<String>, level: u32) -> Self {
        Self {
            purpose: purpose.into(),
            level,
        }
    }

    /// Short label used in progress lines (`tier_2`).
    pub fn label(&self) -> String {
        format!("tier_{}", self.level)
    }
}

impl std::fmt::Display for TierRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/tier_{}", self.purpose, self.level)
    }
}

/// A capability tier. Immutable once the catalog is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub purpose: String,
    pub level: u32,
    /// Opaque selector passed to the invoker (e.g. `local:qwen2.5-coder-7b-instruct`).
    pub model_spec: String,
    /// Prompt budget in characters.
    pub context_budget: usize,
    pub timeout: Duration,
    /// Next level in the same purpose, `None` at the top of the ladder.
    pub escalates_to: Option<u32>,
}

impl Tier {
    fn from_config(purpose: &str, config: &TierConfig) -> Self {
        Self {
            purpose: purpose.to_string(),
            level: config.level,
            model_spec: config.model.clone(),
            context_budget: config.context_budget,
            timeout: Duration::from_secs(config.timeout_secs),
            escalates_to: config.escalates_to,
        }
    }

    pub fn tier_ref(&self) -> TierRef {
        TierRef::new(self.purpose.clone(), self.level)
    }

    pub fn label(&self) -> String {
        format!("tier_{}", self.level)
    }

    pub fn is_top(&self) -> bool {
        self.escalates_to.is_none()
    }
}

/// Read-only catalog of escalation ladders.
#[derive(Debug, Clone, Default)]
pub struct TierCatalog {
    purposes: BTreeMap<String, BTreeMap<u32, Tier>>,
}

impl TierCatalog {
    /// Catalog of the built-in ladders (see [`CatalogConfig::builtin`]).
    pub fn builtin() -> Self {
        Self::build(&CatalogConfig::builtin())
    }

    /// Validate a configuration and build the catalog from it.
    pub fn from_config(config: &CatalogConfig) -> Result<Self, CatalogError> {
        validate(config)?;
        Ok(Self::build(config))
    }

    /// Parse a TOML document of `[[<purpose>]]` tables.
    pub fn from_toml_str(raw: &str) -> Result<Self, CatalogError> {
        let config: CatalogConfig =
            toml::from_str(raw).map_err(|e| CatalogError::Parse(e.to_string()))?;
        Self::from_config(&config)
    }

    fn build(config: &CatalogConfig) -> Self {
        let purposes = config
            .purposes
            .iter()
            .map(|(purpose, tiers)| {
                let ladder = tiers
                    .iter()
                    .map(|t| (t.level, Tier::from_config(purpose, t)))
                    .collect();
                (purpose.clone(), ladder)
            })
            .collect();
        Self { purposes }
    }

    /// Look up a tier. `None` for the level means the entry tier (level 1).
    pub fn resolve(&self, purpose: &str, level: Option<u32>) -> Result<&Tier, CatalogError> {
        let ladder = self
            .purposes
            .get(purpose)
            .ok_or_else(|| CatalogError::UnknownPurpose(purpose.to_string()))?;
        let level = level.unwrap_or(1);
        ladder.get(&level).ok_or_else(|| CatalogError::UnknownTier {
            purpose: purpose.to_string(),
            level,
        })
    }

    /// The tier `tier` escalates to, if any.
    pub fn next(&self, tier: &Tier) -> Option<&Tier> {
        let next_level = tier.escalates_to?;
        self.purposes.get(&tier.purpose)?.get(&next_level)
    }

    /// The full ladder a run for `purpose` would walk, entry tier first.
    pub fn chain(&self, purpose: &str) -> Result<Vec<&Tier>, CatalogError> {
        let mut chain = vec![self.resolve(purpose, None)?];
        while let Some(next) = chain.last().and_then(|t| self.next(t)) {
            if chain.len() >= MAX_CHAIN_LEN {
                break;
            }
            chain.push(next);
        }
        Ok(chain)
    }

    pub fn purposes(&self) -> impl Iterator<Item = &str> {
        self.purposes.keys().map(String::as_str)
    }

    pub fn contains(&self, purpose: &str) -> bool {
        self.purposes.contains_key(purpose)
    }

    /// Every tier of a purpose ordered by level.
    pub fn tiers(&self, purpose: &str) -> Result<Vec<&Tier>, CatalogError> {
        self.purposes
            .get(purpose)
            .map(|ladder| ladder.values().collect())
            .ok_or_else(|| CatalogError::UnknownPurpose(purpose.to_string()))
    }
}

fn validate(config: &CatalogConfig) -> Result<(), CatalogError> {
    for (purpose, tiers) in &config.purposes {
        let mut levels = HashSet::new();
        for tier in tiers {
            let invalid = |reason: &str| CatalogError::InvalidTier {
                purpose: purpose.clone(),
                level: tier.level,
                reason: reason.to_string(),
            };
            if tier.level == 0 {
                return Err(invalid("levels start at 1"));
            }
            if tier.model.trim().is_empty() {
                return Err(invalid("model must not be empty"));
            }
            if tier.context_budget == 0 {
                return Err(invalid("context_budget must be > 0"));
            }
            if tier.timeout_secs == 0 {
                return Err(invalid("timeout_secs must be > 0"));
            }
            if !levels.insert(tier.level) {
                return Err(CatalogError::DuplicateTier {
                    purpose: purpose.clone(),
                    level: tier.level,
                });
            }
        }

        if !levels.contains(&1) {
            return Err(CatalogError::MissingEntryTier(purpose.clone()));
        }

        let links: BTreeMap<u32, Option<u32>> =
            tiers.iter().map(|t| (t.level, t.escalates_to)).collect();
        for (&from, &to) in &links {
            if let Some(to) = to {
                if !links.contains_key(&to) {
                    return Err(CatalogError::DanglingEscalation {
                        purpose: purpose.clone(),
                        from,
                        to,
                    });
                }
            }
        }

        // Walk from every tier so a cycle unreachable from tier_1 is still caught.
        for &start in links.keys() {
            let mut seen = HashSet::new();
            let mut current = Some(start);
            while let Some(level) = current {
                if !seen.insert(level) {
                    return Err(CatalogError::Cycle {
                        purpose: purpose.clone(),
                        level,
                    });
                }
                if seen.len() > MAX_CHAIN_LEN {
                    return Err(CatalogError::ChainTooLong {
                        purpose: purpose.clone(),
                        max: MAX_CHAIN_LEN,
                    });
                }
                current = links.get(&level).copied().flatten();
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder(len: u32) -> Vec<TierConfig> {
        (1..=len)
            .map(|level| {
                let tier = TierConfig::new(level, &format!("local:model-{level}"), 1_000, 10);
                if level < len {
                    tier.escalates_to(level + 1)
                } else {
                    tier
                }
            })
            .collect()
    }

    #[test]
    fn builtin_catalog_is_valid() {
        let config = CatalogConfig::builtin();
        let catalog = TierCatalog::from_config(&config).unwrap();
        assert_eq!(catalog.chain("coding").unwrap().len(), 4);
        assert_eq!(catalog.chain("content").unwrap().len(), 2);
        assert_eq!(catalog.chain("validation").unwrap().len(), 1);
    }

    #[test]
    fn resolve_defaults_to_entry_tier() {
        let catalog = TierCatalog::builtin();
        let tier = catalog.resolve("coding", None).unwrap();
        assert_eq!(tier.level, 1);
        assert_eq!(tier.escalates_to, Some(2));
        assert_eq!(tier.timeout, Duration::from_secs(60));
    }

    #[test]
    fn resolve_unknown_purpose_and_tier() {
        let catalog = TierCatalog::builtin();
        assert_eq!(
            catalog.resolve("poetry", None).unwrap_err(),
            CatalogError::UnknownPurpose("poetry".into())
        );
        assert_eq!(
            catalog.resolve("content", Some(3)).unwrap_err(),
            CatalogError::UnknownTier {
                purpose: "content".into(),
                level: 3
            }
        );
    }

    #[test]
    fn next_walks_the_chain_and_stops_at_top() {
        let catalog = TierCatalog::builtin();
        let t1 = catalog.resolve("content", None).unwrap();
        let t2 = catalog.next(t1).unwrap();
        assert_eq!(t2.level, 2);
        assert!(t2.is_top());
        assert!(catalog.next(t2).is_none());
    }

    #[test]
    fn rejects_cycles() {
        let mut tiers = ladder(3);
        tiers[2].escalates_to = Some(1);
        let config = CatalogConfig::default().with_purpose("coding", tiers);
        assert!(matches!(
            TierCatalog::from_config(&config),
            Err(CatalogError::Cycle { .. })
        ));
    }

    #[test]
    fn rejects_self_loop() {
        let tiers = vec![TierConfig::new(1, "local:a", 100, 5).escalates_to(1)];
        let config = CatalogConfig::default().with_purpose("coding", tiers);
        assert!(matches!(
            TierCatalog::from_config(&config),
            Err(CatalogError::Cycle { level: 1, .. })
        ));
    }

    #[test]
    fn rejects_dangling_escalation() {
        let tiers = vec![TierConfig::new(1, "local:a", 100, 5).escalates_to(7)];
        let config = CatalogConfig::default().with_purpose("coding", tiers);
        assert_eq!(
            TierCatalog::from_config(&config).unwrap_err(),
            CatalogError::DanglingEscalation {
                purpose: "coding".into(),
                from: 1,
                to: 7
            }
        );
    }

    #[test]
    fn rejects_overlong_chain() {
        let config = CatalogConfig::default()
            .with_purpose("coding", ladder(MAX_CHAIN_LEN as u32 + 1));
        assert!(matches!(
            TierCatalog::from_config(&config),
            Err(CatalogError::ChainTooLong { .. })
        ));

        let ok = CatalogConfig::default().with_purpose("coding", ladder(MAX_CHAIN_LEN as u32));
        assert!(TierCatalog::from_config(&ok).is_ok());
    }

    #[test]
    fn rejects_missing_entry_tier_and_bad_fields() {
        let config = CatalogConfig::default()
            .with_purpose("coding", vec![TierConfig::new(2, "local:a", 100, 5)]);
        assert_eq!(
            TierCatalog::from_config(&config).unwrap_err(),
            CatalogError::MissingEntryTier("coding".into())
        );

        let config = CatalogConfig::default()
            .with_purpose("coding", vec![TierConfig::new(1, "local:a", 0, 5)]);
        assert!(matches!(
            TierCatalog::from_config(&config),
            Err(CatalogError::InvalidTier { .. })
        ));

        let config = CatalogConfig::default().with_purpose(
            "coding",
            vec![
                TierConfig::new(1, "local:a", 10, 5),
                TierConfig::new(1, "local:b", 10, 5),
            ],
        );
        assert!(matches!(
            TierCatalog::from_config(&config),
            Err(CatalogError::DuplicateTier { level: 1, .. })
        ));
    }

    #[test]
    fn parses_toml() {
        let raw = r#"
[[coding]]
level = 1
model = "local:small"
context_budget = 4000
timeout_secs = 30
escalates_to = 2

[[coding]]
level = 2
model = "cloud:large"
context_budget = 32000
timeout_secs = 120
"#;
        let catalog = TierCatalog::from_toml_str(raw).unwrap();
        let chain = catalog.chain("coding").unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].model_spec, "cloud:large");
        assert_eq!(chain[1].timeout, Duration::from_secs(120));

        assert!(matches!(
            TierCatalog::from_toml_str("[[coding]]\nlevel = \"x\""),
            Err(CatalogError::Parse(_))
        ));
    }
}
