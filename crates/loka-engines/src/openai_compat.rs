// crates/loka-engines/src/openai_compat.rs

//! One adapter for every OpenAI-compatible vendor
//!
//! OpenAI, Groq, Mistral, Together, Perplexity and Azure OpenAI all speak
//! the same chat-completions JSON; they differ only in base URL, auth
//! header and pricing. Azure additionally addresses a deployment rather
//! than a model, which the endpoint builder accounts for.

use crate::streaming::sse_token_stream;
use crate::{build_http_client, completion_cost, Provider, TokenStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use loka_core::types::{estimate_tokens, CompletionOptions, CompletionResult, Message};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

/// How the vendor expects its API key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    Bearer,
    /// Azure: `api-key` header
    ApiKeyHeader,
}

pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    auth: AuthStyle,
    model: String,
    client: reqwest::Client,
    input_rate: f64,
    output_rate: f64,
}

impl OpenAiCompatProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        base_url: &str,
        api_key: &str,
        auth: AuthStyle,
        model: &str,
        input_rate: f64,
        output_rate: f64,
    ) -> Result<Self> {
        Ok(OpenAiCompatProvider {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            auth,
            model: model.to_string(),
            client: build_http_client(120)?,
            input_rate,
            output_rate,
        })
    }

    fn completions_url(&self) -> String {
        // Azure deployments already carry the full path including api-version
        if self.base_url.contains("api-version=") {
            self.base_url.clone()
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }

    fn payload(&self, messages: &[Message], options: &CompletionOptions, stream: bool) -> Value {
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if let Some(temperature) = options.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        payload
    }

    async fn send(&self, payload: &Value, timeout_secs: u64) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(self.completions_url())
            .timeout(Duration::from_secs(timeout_secs))
            .json(payload);
        request = match self.auth {
            AuthStyle::Bearer => request.bearer_auth(&self.api_key),
            AuthStyle::ApiKeyHeader => request.header("api-key", &self.api_key),
        };
        Ok(request.send().await?)
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn cost_per_1k_input_eur(&self) -> f64 {
        self.input_rate
    }

    fn cost_per_1k_output_eur(&self) -> f64 {
        self.output_rate
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CompletionResult> {
        let started = Instant::now();
        let payload = self.payload(messages, options, false);
        let body: Value = self.send(&payload, options.timeout_secs).await?.json().await?;
        debug!("{} response: {:?}", self.name, body);

        if let Some(error) = body.get("error") {
            return Err(anyhow!("{} API error: {:?}", self.name, error));
        }

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow!("Failed to extract content from {} response", self.name))?
            .to_string();
        let prompt_tokens = body["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let completion_tokens = body["usage"]["completion_tokens"]
            .as_u64()
            .unwrap_or_else(|| u64::from(estimate_tokens(&content)))
            as u32;

        Ok(CompletionResult {
            content,
            model: body["model"].as_str().unwrap_or(&self.model).to_string(),
            prompt_tokens,
            completion_tokens,
            cost_eur: completion_cost(prompt_tokens, completion_tokens, self.input_rate, self.output_rate),
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<TokenStream> {
        let payload = self.payload(messages, options, true);
        let response = self.send(&payload, options.timeout_secs).await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "{} stream request failed with status {}",
                self.name,
                response.status()
            ));
        }
        Ok(sse_token_stream(response, extract_delta))
    }

    async fn health_check(&self) -> bool {
        let url = if self.base_url.contains("api-version=") {
            return true; // Azure has no cheap unauthenticated probe per deployment
        } else {
            format!("{}/models", self.base_url)
        };
        let mut request = self.client.get(url).timeout(Duration::from_secs(5));
        request = match self.auth {
            AuthStyle::Bearer => request.bearer_auth(&self.api_key),
            AuthStyle::ApiKeyHeader => request.header("api-key", &self.api_key),
        };
        request
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

fn extract_delta(value: &Value) -> Option<String> {
    value["choices"][0]["delta"]["content"].as_str().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiCompatProvider {
        OpenAiCompatProvider::new(
            "openai",
            "https://api.openai.com/v1",
            "key",
            AuthStyle::Bearer,
            "gpt-4o-mini",
            0.00014,
            0.0006,
        )
        .unwrap()
    }

    #[test]
    fn test_completions_url() {
        assert_eq!(
            provider().completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );

        let azure = OpenAiCompatProvider::new(
            "azure",
            "https://unit.openai.azure.com/openai/deployments/gpt4o/chat/completions?api-version=2024-06-01",
            "key",
            AuthStyle::ApiKeyHeader,
            "gpt-4o",
            0.0023,
            0.0092,
        )
        .unwrap();
        assert!(azure.completions_url().contains("api-version="));
    }

    #[test]
    fn test_payload_carries_sampling_options() {
        let options = CompletionOptions {
            temperature: Some(0.7),
            max_tokens: Some(256),
            timeout_secs: 60,
        };
        let payload = provider().payload(&[Message::user("hi")], &options, true);
        assert_eq!(payload["stream"], json!(true));
        assert_eq!(payload["temperature"], json!(0.7));
        assert_eq!(payload["max_tokens"], json!(256));
        assert_eq!(payload["model"], json!("gpt-4o-mini"));
    }

    #[test]
    fn test_extract_delta() {
        let value = json!({"choices": [{"delta": {"content": "frag"}}]});
        assert_eq!(extract_delta(&value), Some("frag".to_string()));

        let role_chunk = json!({"choices": [{"delta": {"role": "assistant"}}]});
        assert_eq!(extract_delta(&role_chunk), None);
    }
}
