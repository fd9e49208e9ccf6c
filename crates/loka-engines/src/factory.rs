// crates/loka-engines/src/factory.rs

//! Provider pool construction
//!
//! The pool is built once at startup from the config file plus environment
//! variables. A vendor whose API key is absent is simply omitted. When no
//! cloud vendor has a key at all, the cloud slot is filled with a zero-cost
//! local adapter; the router detects that case and retargets high-complexity
//! work to the specialist when one is configured.

use crate::anthropic::AnthropicProvider;
use crate::cohere::CohereProvider;
use crate::gemini::GeminiProvider;
use crate::local::LocalProvider;
use crate::openai_compat::{AuthStyle, OpenAiCompatProvider};
use crate::Provider;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use loka_core::config::LokaConfig;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, EnumIter)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum Vendor {
    Anthropic,
    OpenAI,
    Gemini,
    Groq,
    Mistral,
    Together,
    Perplexity,
    Cohere,
    Azure,
}

impl Vendor {
    pub fn env_key(self) -> &'static str {
        match self {
            Vendor::Anthropic => "ANTHROPIC_API_KEY",
            Vendor::OpenAI => "OPENAI_API_KEY",
            Vendor::Gemini => "GEMINI_API_KEY",
            Vendor::Groq => "GROQ_API_KEY",
            Vendor::Mistral => "MISTRAL_API_KEY",
            Vendor::Together => "TOGETHER_API_KEY",
            Vendor::Perplexity => "PERPLEXITY_API_KEY",
            Vendor::Cohere => "COHERE_API_KEY",
            Vendor::Azure => "AZURE_OPENAI_API_KEY",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Vendor::Anthropic => "claude-3-5-sonnet-latest",
            Vendor::OpenAI => "gpt-4o",
            Vendor::Gemini => "gemini-1.5-pro",
            Vendor::Groq => "llama-3.3-70b-versatile",
            Vendor::Mistral => "mistral-large-latest",
            Vendor::Together => "meta-llama/Llama-3.3-70B-Instruct-Turbo",
            Vendor::Perplexity => "sonar-pro",
            Vendor::Cohere => "command-r-plus",
            Vendor::Azure => "gpt-4o",
        }
    }

    /// EUR per 1k input/output tokens for the OpenAI-compatible family
    fn rates(self) -> (f64, f64) {
        match self {
            Vendor::OpenAI | Vendor::Azure => (0.0023, 0.0092),
            Vendor::Groq => (0.00055, 0.00073),
            Vendor::Mistral => (0.0018, 0.0055),
            Vendor::Together => (0.0008, 0.0008),
            Vendor::Perplexity => (0.0009, 0.0009),
            _ => (0.0, 0.0),
        }
    }

    fn base_url(self) -> &'static str {
        match self {
            Vendor::OpenAI => "https://api.openai.com/v1",
            Vendor::Groq => "https://api.groq.com/openai/v1",
            Vendor::Mistral => "https://api.mistral.ai/v1",
            Vendor::Together => "https://api.together.xyz/v1",
            Vendor::Perplexity => "https://api.perplexity.ai",
            _ => "",
        }
    }

    /// Build the adapter if this vendor's key is present in the environment
    pub fn build(self, model: &str) -> Result<Option<Arc<dyn Provider>>> {
        let Ok(api_key) = std::env::var(self.env_key()) else {
            debug!("{} omitted: {} not set", self, self.env_key());
            return Ok(None);
        };
        if api_key.is_empty() {
            return Ok(None);
        }

        let provider: Arc<dyn Provider> = match self {
            Vendor::Anthropic => Arc::new(AnthropicProvider::new(&api_key, model)?),
            Vendor::Gemini => Arc::new(GeminiProvider::new(&api_key, model)?),
            Vendor::Cohere => Arc::new(CohereProvider::new(&api_key, model)?),
            Vendor::Azure => {
                let endpoint = std::env::var("AZURE_OPENAI_ENDPOINT")
                    .context("AZURE_OPENAI_API_KEY set but AZURE_OPENAI_ENDPOINT missing")?;
                let deployment = std::env::var("AZURE_OPENAI_DEPLOYMENT")
                    .context("AZURE_OPENAI_API_KEY set but AZURE_OPENAI_DEPLOYMENT missing")?;
                let url = format!(
                    "{}/openai/deployments/{}/chat/completions?api-version=2024-06-01",
                    endpoint.trim_end_matches('/'),
                    deployment
                );
                let (input_rate, output_rate) = self.rates();
                Arc::new(OpenAiCompatProvider::new(
                    "azure",
                    &url,
                    &api_key,
                    AuthStyle::ApiKeyHeader,
                    model,
                    input_rate,
                    output_rate,
                )?)
            }
            Vendor::OpenAI | Vendor::Groq | Vendor::Mistral | Vendor::Together | Vendor::Perplexity => {
                let (input_rate, output_rate) = self.rates();
                Arc::new(OpenAiCompatProvider::new(
                    &self.to_string(),
                    self.base_url(),
                    &api_key,
                    AuthStyle::Bearer,
                    model,
                    input_rate,
                    output_rate,
                )?)
            }
        };
        Ok(Some(provider))
    }
}

/// The fixed set of backends the router selects from
pub struct ProviderPool {
    locals: Vec<Arc<dyn Provider>>,
    specialist: Option<Arc<dyn Provider>>,
    cloud: Arc<dyn Provider>,
    next_local: AtomicUsize,
}

impl ProviderPool {
    pub fn new(
        locals: Vec<Arc<dyn Provider>>,
        specialist: Option<Arc<dyn Provider>>,
        cloud: Arc<dyn Provider>,
    ) -> Self {
        assert!(!locals.is_empty(), "pool requires at least one local worker");
        ProviderPool {
            locals,
            specialist,
            cloud,
            next_local: AtomicUsize::new(0),
        }
    }

    /// Round-robin over the local workers
    pub fn next_local(&self) -> Arc<dyn Provider> {
        let index = self.next_local.fetch_add(1, Ordering::Relaxed) % self.locals.len();
        Arc::clone(&self.locals[index])
    }

    /// The `index mod n`-th local worker, used by the delegation engine to
    /// spread concurrent subtasks deterministically
    pub fn local_at(&self, index: usize) -> Arc<dyn Provider> {
        Arc::clone(&self.locals[index % self.locals.len()])
    }

    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    pub fn locals(&self) -> &[Arc<dyn Provider>] {
        &self.locals
    }

    pub fn specialist(&self) -> Option<Arc<dyn Provider>> {
        self.specialist.clone()
    }

    pub fn cloud(&self) -> Arc<dyn Provider> {
        Arc::clone(&self.cloud)
    }

    /// True when the cloud slot is really a zero-cost local stand-in
    pub fn cloud_is_zero_cost(&self) -> bool {
        self.cloud.cost_per_1k_input_eur() == 0.0
    }

    /// Every distinct provider, for health and model listings
    pub fn all(&self) -> Vec<Arc<dyn Provider>> {
        let mut providers: Vec<Arc<dyn Provider>> = self.locals.clone();
        if let Some(specialist) = &self.specialist {
            if !providers.iter().any(|p| p.name() == specialist.name()) {
                providers.push(Arc::clone(specialist));
            }
        }
        if !providers.iter().any(|p| p.name() == self.cloud.name()) {
            providers.push(Arc::clone(&self.cloud));
        }
        providers
    }
}

/// Assemble the pool from config and environment
pub fn build_pool(config: &LokaConfig) -> Result<ProviderPool> {
    let locals: Vec<Arc<dyn Provider>> = config
        .local
        .base_urls
        .iter()
        .map(|url| {
            LocalProvider::new(url, &config.local.model).map(|p| Arc::new(p) as Arc<dyn Provider>)
        })
        .collect::<Result<_>>()?;

    let specialist = match &config.specialist {
        Some(configured) => {
            let vendor = Vendor::from_str(&configured.provider).map_err(|_| {
                anyhow::anyhow!("unknown specialist provider '{}'", configured.provider)
            })?;
            let built = vendor.build(&configured.model)?;
            if built.is_none() {
                warn!(
                    "specialist {} configured but {} is not set; specialist tier will run locally",
                    configured.provider,
                    vendor.env_key()
                );
            }
            built
        }
        None => None,
    };

    let cloud = pick_cloud(config)?.unwrap_or_else(|| {
        warn!("no cloud provider key configured; cloud tier falls back to the local engine");
        Arc::clone(&locals[0])
    });

    info!(
        "provider pool: {} local worker(s), specialist={}, cloud={}",
        locals.len(),
        specialist.as_ref().map(|s| s.name().to_string()).unwrap_or_else(|| "none".into()),
        cloud.name()
    );
    Ok(ProviderPool::new(locals, specialist, cloud))
}

fn pick_cloud(config: &LokaConfig) -> Result<Option<Arc<dyn Provider>>> {
    let mut order: Vec<Vendor> = Vec::new();
    for configured in [&config.cloud.primary, &config.cloud.fallback].into_iter().flatten() {
        match Vendor::from_str(configured) {
            Ok(vendor) => order.push(vendor),
            Err(_) => warn!("unknown cloud vendor '{}' in config, skipping", configured),
        }
    }
    for vendor in Vendor::iter() {
        if !order.contains(&vendor) {
            order.push(vendor);
        }
    }

    for vendor in order {
        let model = config
            .cloud
            .models
            .get(&vendor.to_string())
            .map(String::as_str)
            .unwrap_or_else(|| vendor.default_model());
        if let Some(provider) = vendor.build(model)? {
            return Ok(Some(provider));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_from_str_case_insensitive() {
        assert_eq!(Vendor::from_str("anthropic").unwrap(), Vendor::Anthropic);
        assert_eq!(Vendor::from_str("OpenAI").unwrap(), Vendor::OpenAI);
        assert!(Vendor::from_str("nonsense").is_err());
    }

    #[test]
    fn test_every_vendor_has_an_env_key_and_model() {
        for vendor in Vendor::iter() {
            assert!(vendor.env_key().ends_with("_API_KEY"));
            assert!(!vendor.default_model().is_empty());
        }
    }

    #[test]
    fn test_round_robin_wraps() {
        let a: Arc<dyn Provider> =
            Arc::new(LocalProvider::new("http://a:11434", "llama3.2:3b").unwrap());
        let b: Arc<dyn Provider> =
            Arc::new(LocalProvider::new("http://b:11434", "llama3.2:3b").unwrap());
        let pool = ProviderPool::new(vec![a, b], None, Arc::new(LocalProvider::new("http://a:11434", "llama3.2:3b").unwrap()));

        let first = pool.next_local().name().to_string();
        let second = pool.next_local().name().to_string();
        let third = pool.next_local().name().to_string();
        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_local_at_is_index_mod_count() {
        let a: Arc<dyn Provider> =
            Arc::new(LocalProvider::new("http://a:11434", "llama3.2:3b").unwrap());
        let b: Arc<dyn Provider> =
            Arc::new(LocalProvider::new("http://b:11434", "llama3.2:3b").unwrap());
        let cloud = Arc::clone(&a);
        let pool = ProviderPool::new(vec![a, b], None, cloud);

        assert_eq!(pool.local_at(0).name(), pool.local_at(2).name());
        assert_ne!(pool.local_at(0).name(), pool.local_at(1).name());
    }

    #[test]
    fn test_zero_cost_cloud_detection() {
        let local: Arc<dyn Provider> =
            Arc::new(LocalProvider::new("http://a:11434", "llama3.2:3b").unwrap());
        let pool = ProviderPool::new(vec![Arc::clone(&local)], None, local);
        assert!(pool.cloud_is_zero_cost());
    }
}
