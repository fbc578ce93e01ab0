use std::path::Path;

use anyhow::{bail, Context, Result};
use coordination::{CatalogConfig, SchedulerConfig, TierCatalog};
use serde::{Deserialize, Serialize};

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "tierforge.toml";

/// One OpenAI-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendEndpoint {
    /// Base URL, e.g. `http://localhost:8080/v1`
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Where `local:` and `cloud:` model specs are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    pub local: BackendEndpoint,
    pub cloud: BackendEndpoint,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            local: BackendEndpoint {
                url: "http://localhost:8080/v1".into(),
                api_key: None,
            },
            cloud: BackendEndpoint {
                url: "https://api.openai.com/v1".into(),
                api_key: None,
            },
        }
    }
}

/// Naming service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub enabled: bool,
    /// Model spec used to name workflows (`local:` or `cloud:` prefixed)
    pub model: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "local:qwen2.5-coder-7b-instruct".into(),
        }
    }
}

/// Top-level `tierforge.toml`.
///
/// Every section is optional. An empty `[tiers]` table means the built-in
/// catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub backends: BackendsConfig,
    pub naming: NamingConfig,
    pub tiers: CatalogConfig,
}

impl AppConfig {
    /// Load from `path`, or from `./tierforge.toml` if present, then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Failed to parse TOML")
    }

    /// Apply `TIERFORGE_*` overrides. `lookup` is `std::env::var` in
    /// production.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("TIERFORGE_LOCAL_URL") {
            self.backends.local.url = url;
        }
        if let Some(key) = lookup("TIERFORGE_LOCAL_API_KEY") {
            self.backends.local.api_key = Some(key);
        }
        if let Some(url) = lookup("TIERFORGE_CLOUD_URL") {
            self.backends.cloud.url = url;
        }
        if let Some(key) = lookup("TIERFORGE_CLOUD_API_KEY") {
            self.backends.cloud.api_key = Some(key);
        }
        if let Some(raw) = lookup("TIERFORGE_MAX_CONCURRENT") {
            self.scheduler.max_concurrent = raw
                .trim()
                .parse()
                .with_context(|| format!("TIERFORGE_MAX_CONCURRENT is not a number: {raw:?}"))?;
        }
        if let Some(model) = lookup("TIERFORGE_NAMING_MODEL") {
            self.naming.model = model;
        }
        Ok(())
    }

    /// Configured tiers, or the built-in ladder when none are configured.
    pub fn catalog(&self) -> Result<TierCatalog> {
        if self.tiers.is_empty() {
            return Ok(TierCatalog::builtin());
        }
        TierCatalog::from_config(&self.tiers).context("Invalid tier catalog")
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler
            .validate()
            .context("Invalid [scheduler] section")?;
        let catalog = self.catalog()?;
        if !catalog.contains(&self.scheduler.default_purpose) {
            bail!(
                "default_purpose {:?} is not in the tier catalog",
                self.scheduler.default_purpose
            );
        }
        if self.naming.enabled && self.naming.model.trim().is_empty() {
            bail!("[naming] model must be set when naming is enabled");
        }
        Ok(())
    }
}
