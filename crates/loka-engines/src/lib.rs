//! Provider adapters for the Loka gateway
//!
//! One adapter per backend: the local vendor-HTTP inference engine plus the
//! cloud vendors (Anthropic, the OpenAI-compatible family, Google Gemini,
//! Cohere). All adapters implement the common [`Provider`] trait so the
//! router can treat local and cloud execution uniformly.
//!
//! # Supported backends
//!
//! - **Local** - any engine speaking the Ollama-style HTTP protocol
//! - **Anthropic** - Claude models via `/v1/messages`
//! - **OpenAI-compatible** - OpenAI, Groq, Mistral, Together, Perplexity
//!   and Azure OpenAI through one parameterised adapter
//! - **Google Gemini** - `generateContent` API
//! - **Cohere** - `/v2/chat` API

use async_trait::async_trait;
use futures::stream::Stream;
use loka_core::types::{CompletionOptions, CompletionResult, Message};
use std::pin::Pin;

pub mod anthropic;
pub mod cohere;
pub mod factory;
pub mod gemini;
pub mod local;
pub mod openai_compat;
pub mod streaming;

pub use factory::{build_pool, ProviderPool, Vendor};

/// A lazy, non-restartable sequence of text fragments
///
/// Producers release their underlying connection when the stream is dropped,
/// so cancelling a client request cancels the provider call.
pub type TokenStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

/// Capability set every backend adapter provides
///
/// Invariant: cost rates are never negative, and a zero-cost provider is
/// safe to call with no WAN egress.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    fn cost_per_1k_input_eur(&self) -> f64;

    fn cost_per_1k_output_eur(&self) -> f64;

    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> anyhow::Result<CompletionResult>;

    async fn stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> anyhow::Result<TokenStream>;

    async fn health_check(&self) -> bool;
}

/// EUR cost of a completion at the given per-1k rates
pub(crate) fn completion_cost(
    prompt_tokens: u32,
    completion_tokens: u32,
    input_rate: f64,
    output_rate: f64,
) -> f64 {
    f64::from(prompt_tokens) / 1000.0 * input_rate
        + f64::from(completion_tokens) / 1000.0 * output_rate
}

/// Shared HTTP client construction with pooling tuned for chat workloads
pub(crate) fn build_http_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .connect_timeout(std::time::Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .tcp_keepalive(std::time::Duration::from_secs(60))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_cost() {
        let cost = completion_cost(1000, 500, 0.003, 0.015);
        assert!((cost - 0.0105).abs() < 1e-9);
        assert_eq!(completion_cost(0, 0, 0.003, 0.015), 0.0);
        assert_eq!(completion_cost(5000, 5000, 0.0, 0.0), 0.0);
    }
}
