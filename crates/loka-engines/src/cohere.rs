// crates/loka-engines/src/cohere.rs

//! Cohere adapter for the v2 chat API
//!
//! Bearer-authenticated `/v2/chat`; streaming emits SSE `content-delta`
//! events carrying nested message deltas.

use crate::streaming::sse_token_stream;
use crate::{build_http_client, completion_cost, Provider, TokenStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use loka_core::types::{estimate_tokens, CompletionOptions, CompletionResult, Message};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

const API_BASE: &str = "https://api.cohere.com";

pub struct CohereProvider {
    api_key: String,
    model: String,
    client: reqwest::Client,
    input_rate: f64,
    output_rate: f64,
}

impl CohereProvider {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        Ok(CohereProvider {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: build_http_client(120)?,
            input_rate: 0.0023,
            output_rate: 0.0092,
        })
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
}

#[async_trait]
impl Provider for CohereProvider {
    fn name(&self) -> &str {
        "cohere"
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
        let body: Value = self
            .client
            .post(format!("{}/v2/chat", API_BASE))
            .timeout(Duration::from_secs(options.timeout_secs))
            .bearer_auth(&self.api_key)
            .json(&self.payload(messages, options, false))
            .send()
            .await?
            .json()
            .await?;
        debug!("cohere response: {:?}", body);

        if body.get("message").is_none() {
            return Err(anyhow!("Cohere API error: {:?}", body));
        }

        let content = body["message"]["content"][0]["text"]
            .as_str()
            .ok_or_else(|| anyhow!("Failed to extract content from Cohere response"))?
            .to_string();
        let prompt_tokens = body["usage"]["tokens"]["input_tokens"].as_u64().unwrap_or(0) as u32;
        let completion_tokens = body["usage"]["tokens"]["output_tokens"]
            .as_u64()
            .unwrap_or_else(|| u64::from(estimate_tokens(&content)))
            as u32;

        Ok(CompletionResult {
            content,
            model: self.model.clone(),
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
        let response = self
            .client
            .post(format!("{}/v2/chat", API_BASE))
            .timeout(Duration::from_secs(options.timeout_secs))
            .bearer_auth(&self.api_key)
            .json(&self.payload(messages, options, true))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Cohere stream request failed with status {}",
                response.status()
            ));
        }
        Ok(sse_token_stream(response, extract_delta))
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/v1/models", API_BASE))
            .timeout(Duration::from_secs(5))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

fn extract_delta(value: &Value) -> Option<String> {
    if value["type"].as_str() == Some("content-delta") {
        value["delta"]["message"]["content"]["text"]
            .as_str()
            .map(String::from)
    } else {
        None
    }
}
