// crates/loka-engines/src/local.rs

//! Adapter for a local inference engine speaking the Ollama HTTP protocol
//!
//! Chat completions go to `POST /api/chat`; responses are newline-delimited
//! JSON when streaming. The adapter reports zero cost per token and only
//! ever talks to the configured base URL, so it is safe to call with no
//! WAN egress.

use crate::streaming::ndjson_token_stream;
use crate::{build_http_client, Provider, TokenStream};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use loka_core::types::{estimate_tokens, CompletionOptions, CompletionResult, Message};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

pub struct LocalProvider {
    name: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl LocalProvider {
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        Ok(LocalProvider {
            name: format!("local({})", base_url),
            base_url,
            model: model.to_string(),
            client: build_http_client(120)?,
        })
    }

    fn chat_payload(&self, messages: &[Message], options: &CompletionOptions, stream: bool) -> Value {
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        let mut opts = serde_json::Map::new();
        if let Some(temperature) = options.temperature {
            opts.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_tokens) = options.max_tokens {
            opts.insert("num_predict".to_string(), json!(max_tokens));
        }
        if !opts.is_empty() {
            payload["options"] = Value::Object(opts);
        }
        payload
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn cost_per_1k_input_eur(&self) -> f64 {
        0.0
    }

    fn cost_per_1k_output_eur(&self) -> f64 {
        0.0
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CompletionResult> {
        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(Duration::from_secs(options.timeout_secs))
            .json(&self.chat_payload(messages, options, false))
            .send()
            .await
            .with_context(|| format!("local engine at {} unreachable", self.base_url))?;

        let body: Value = response.json().await?;
        debug!("local response: {:?}", body);
        if let Some(error) = body.get("error") {
            return Err(anyhow!("local engine error: {}", error));
        }

        let content = body["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow!("no content in local engine response"))?
            .to_string();

        let prompt_tokens = body["prompt_eval_count"].as_u64().unwrap_or_else(|| {
            let joined: String = messages.iter().map(|m| m.content.as_str()).collect();
            u64::from(estimate_tokens(&joined))
        }) as u32;
        let completion_tokens = body["eval_count"]
            .as_u64()
            .unwrap_or_else(|| u64::from(estimate_tokens(&content)))
            as u32;

        Ok(CompletionResult {
            content,
            model: self.model.clone(),
            prompt_tokens,
            completion_tokens,
            cost_eur: 0.0,
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
            .post(format!("{}/api/chat", self.base_url))
            .timeout(Duration::from_secs(options.timeout_secs))
            .json(&self.chat_payload(messages, options, true))
            .send()
            .await
            .with_context(|| format!("local engine at {} unreachable", self.base_url))?;

        Ok(ndjson_token_stream(response, extract_fragment))
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(3))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

fn extract_fragment(value: &Value) -> Option<String> {
    value["message"]["content"].as_str().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_cost_invariant() {
        let provider = LocalProvider::new("http://localhost:11434", "llama3.2:3b").unwrap();
        assert_eq!(provider.cost_per_1k_input_eur(), 0.0);
        assert_eq!(provider.cost_per_1k_output_eur(), 0.0);
        assert_eq!(provider.model(), "llama3.2:3b");
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let provider = LocalProvider::new("http://10.0.0.2:11434/", "qwen2.5:7b").unwrap();
        assert_eq!(provider.base_url, "http://10.0.0.2:11434");
    }

    #[test]
    fn test_payload_includes_sampling_options() {
        let provider = LocalProvider::new("http://localhost:11434", "llama3.2:3b").unwrap();
        let options = CompletionOptions {
            temperature: Some(0.2),
            max_tokens: Some(128),
            timeout_secs: 60,
        };
        let payload = provider.chat_payload(&[Message::user("hi")], &options, true);
        assert_eq!(payload["stream"], serde_json::json!(true));
        assert_eq!(payload["options"]["temperature"], serde_json::json!(0.2));
        assert_eq!(payload["options"]["num_predict"], serde_json::json!(128));
    }

    #[test]
    fn test_extract_fragment() {
        let value = serde_json::json!({"message": {"content": "to"}, "done": false});
        assert_eq!(extract_fragment(&value), Some("to".to_string()));
        let done = serde_json::json!({"done": true});
        assert_eq!(extract_fragment(&done), None);
    }
}
