// crates/loka-engines/src/anthropic.rs

//! Anthropic adapter
//!
//! Talks to `/v1/messages` with the `x-api-key` and `anthropic-version`
//! headers. System messages are folded into the top-level `system` field;
//! streaming uses SSE `content_block_delta` events.

use crate::streaming::sse_token_stream;
use crate::{build_http_client, completion_cost, Provider, TokenStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use loka_core::types::{estimate_tokens, CompletionOptions, CompletionResult, Message, Role};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

const API_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    api_key: String,
    model: String,
    client: reqwest::Client,
    input_rate: f64,
    output_rate: f64,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        let (input_rate, output_rate) = Self::pricing(model);
        Ok(AnthropicProvider {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: build_http_client(120)?,
            input_rate,
            output_rate,
        })
    }

    /// EUR per 1k tokens by model family
    fn pricing(model: &str) -> (f64, f64) {
        if model.contains("haiku") {
            (0.0008, 0.004)
        } else if model.contains("sonnet") {
            (0.003, 0.015)
        } else if model.contains("opus") {
            (0.015, 0.075)
        } else {
            (0.003, 0.015)
        }
    }

    fn payload(&self, messages: &[Message], options: &CompletionOptions, stream: bool) -> Value {
        let system: String = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let turns: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                json!({
                    "role": if m.role == Role::Assistant { "assistant" } else { "user" },
                    "content": m.content,
                })
            })
            .collect();

        let mut payload = json!({
            "model": self.model,
            "messages": turns,
            "max_tokens": options.max_tokens.unwrap_or(4096),
            "stream": stream,
        });
        if !system.is_empty() {
            payload["system"] = json!(system);
        }
        if let Some(temperature) = options.temperature {
            payload["temperature"] = json!(temperature);
        }
        payload
    }

    async fn send(&self, payload: &Value, timeout_secs: u64) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/v1/messages", API_BASE))
            .timeout(Duration::from_secs(timeout_secs))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(payload)
            .send()
            .await?;
        Ok(response)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
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
        debug!("anthropic response: {:?}", body);

        if let Some(error) = body.get("error") {
            return Err(anyhow!("Anthropic API error: {:?}", error));
        }

        let content = body["content"][0]["text"]
            .as_str()
            .ok_or_else(|| anyhow!("Failed to extract content from Anthropic response"))?
            .to_string();
        let prompt_tokens = body["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
        let completion_tokens = body["usage"]["output_tokens"]
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
                "Anthropic stream request failed with status {}",
                response.status()
            ));
        }
        Ok(sse_token_stream(response, extract_delta))
    }

    async fn health_check(&self) -> bool {
        // key-scoped models listing, cheap and side-effect free
        self.client
            .get(format!("{}/v1/models", API_BASE))
            .timeout(Duration::from_secs(5))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

fn extract_delta(value: &Value) -> Option<String> {
    if value["type"].as_str() == Some("content_block_delta") {
        value["delta"]["text"].as_str().map(String::from)
    } else {
        None
    }
}
