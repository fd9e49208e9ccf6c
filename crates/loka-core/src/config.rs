// crates/loka-core/src/config.rs

//! Configuration loading for the Loka gateway
//!
//! The config file is YAML and accepts both camelCase and snake_case key
//! spellings. Every section is optional; defaults are applied for anything
//! absent, so an empty file yields a fully usable local-only gateway.
//! Provider API keys never live in the file — they come from environment
//! variables resolved at pool construction time.

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct LokaConfig {
    pub router: RouterConfig,
    pub budget: BudgetLimits,
    pub local: LocalConfig,
    pub specialist: Option<SpecialistConfig>,
    pub cloud: CloudConfig,
    pub memory: MemoryConfig,
    pub search: SearchConfig,
    pub mesh: MeshConfig,
}

/// What the router does when the PII scan reports a detection
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PiiAction {
    /// Short-circuit to local execution (the default)
    #[default]
    Local,
    /// Fail the request with a PII error
    Block,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RouterConfig {
    #[serde(alias = "complexityLocalThreshold")]
    pub complexity_local_threshold: f64,
    #[serde(alias = "complexityCloudThreshold")]
    pub complexity_cloud_threshold: f64,
    #[serde(alias = "maxLocalTokens")]
    pub max_local_tokens: u32,
    #[serde(alias = "fallbackToLocal")]
    pub fallback_to_local: bool,
    #[serde(alias = "piiAction")]
    pub pii_action: PiiAction,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            complexity_local_threshold: 0.35,
            complexity_cloud_threshold: 0.65,
            max_local_tokens: 6000,
            fallback_to_local: true,
            pii_action: PiiAction::Local,
        }
    }
}

/// Process-wide spend caps enforced by the budget ledger
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
#[serde(default)]
pub struct BudgetLimits {
    #[serde(alias = "dailyEur")]
    pub daily_eur: f64,
    #[serde(alias = "monthlyEur")]
    pub monthly_eur: f64,
    #[serde(alias = "warnAtPercent")]
    pub warn_at_percent: u8,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        BudgetLimits {
            daily_eur: 5.0,
            monthly_eur: 60.0,
            warn_at_percent: 80,
        }
    }
}

/// Local inference engine endpoints
///
/// Accepts either `baseUrl` (singular) or `baseUrls` (list); both are
/// normalised into `base_urls` at load time so downstream code sees one
/// shape.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LocalConfig {
    #[serde(alias = "baseUrl")]
    pub base_url: Option<String>,
    #[serde(alias = "baseUrls")]
    pub base_urls: Vec<String>,
    pub model: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        LocalConfig {
            base_url: None,
            base_urls: Vec::new(),
            model: "llama3.2:3b".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SpecialistConfig {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct CloudConfig {
    /// Preferred cloud vendor, e.g. "anthropic"
    pub primary: Option<String>,
    /// Vendor tried when the primary has no key configured
    pub fallback: Option<String>,
    /// Per-vendor model identifier overrides
    pub models: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    pub enabled: bool,
    #[serde(alias = "topK")]
    pub top_k: usize,
    #[serde(alias = "sessionId")]
    pub session_id: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            enabled: false,
            top_k: 4,
            session_id: "default".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub enabled: bool,
    pub sources: Vec<String>,
    #[serde(alias = "minScore")]
    pub min_score: f64,
    #[serde(alias = "maxResults")]
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            enabled: false,
            sources: vec!["web".to_string(), "papers".to_string()],
            min_score: 5.0,
            max_results: 5,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MeshConfig {
    pub enabled: bool,
    #[serde(alias = "idleMinutes")]
    pub idle_minutes: u64,
    #[serde(alias = "wakeOnLan")]
    pub wake_on_lan: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        MeshConfig {
            enabled: false,
            idle_minutes: 10,
            wake_on_lan: false,
        }
    }
}

impl LokaConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: LokaConfig = if content.trim().is_empty() {
            LokaConfig::default()
        } else {
            serde_yaml::from_str(content).context("Could not parse config file")?
        };
        config.normalize();
        debug!("Loaded config: {:?}", config);
        Ok(config)
    }

    /// Fold the singular `baseUrl` form into `base_urls` and apply the
    /// built-in default endpoint when neither was given
    fn normalize(&mut self) {
        if let Some(url) = self.local.base_url.take() {
            if !self.local.base_urls.contains(&url) {
                self.local.base_urls.insert(0, url);
            }
        }
        if self.local.base_urls.is_empty() {
            self.local
                .base_urls
                .push("http://localhost:11434".to_string());
        }
    }

    /// Shared gateway API key; auth is disabled when unset
    pub fn gateway_api_key() -> Option<String> {
        std::env::var("LOKA_API_KEY").ok().filter(|k| !k.is_empty())
    }
}
