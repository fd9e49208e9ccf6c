// crates/loka-engines/src/gemini.rs

//! Google Gemini adapter
//!
//! Uses the `generateContent` endpoint with the API key as a query
//! parameter; streaming goes through `streamGenerateContent?alt=sse`.
//! System messages map onto `system_instruction`, user/assistant turns onto
//! `contents` with roles `user`/`model`.

use crate::streaming::sse_token_stream;
use crate::{build_http_client, completion_cost, Provider, TokenStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use loka_core::types::{estimate_tokens, CompletionOptions, CompletionResult, Message, Role};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    api_key: String,
    model: String,
    client: reqwest::Client,
    input_rate: f64,
    output_rate: f64,
}

impl GeminiProvider {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        let (input_rate, output_rate) = Self::pricing(model);
        Ok(GeminiProvider {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: build_http_client(120)?,
            input_rate,
            output_rate,
        })
    }

    fn pricing(model: &str) -> (f64, f64) {
        if model.contains("flash") {
            (0.00028, 0.0011)
        } else if model.contains("pro") {
            (0.0012, 0.0046)
        } else {
            (0.0012, 0.0046)
        }
    }

    fn payload(&self, messages: &[Message], options: &CompletionOptions) -> Value {
        let system: String = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let contents: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                json!({
                    "role": if m.role == Role::Assistant { "model" } else { "user" },
                    "parts": [{"text": m.content}],
                })
            })
            .collect();

        let mut payload = json!({ "contents": contents });
        if !system.is_empty() {
            payload["system_instruction"] = json!({"parts": [{"text": system}]});
        }
        let mut generation = serde_json::Map::new();
        if let Some(temperature) = options.temperature {
            generation.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_tokens) = options.max_tokens {
            generation.insert("maxOutputTokens".to_string(), json!(max_tokens));
        }
        if !generation.is_empty() {
            payload["generationConfig"] = Value::Object(generation);
        }
        payload
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
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
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            API_BASE, self.model, self.api_key
        );
        let body: Value = self
            .client
            .post(url)
            .timeout(Duration::from_secs(options.timeout_secs))
            .json(&self.payload(messages, options))
            .send()
            .await?
            .json()
            .await?;
        debug!("gemini response: {:?}", body);

        if let Some(error) = body.get("error") {
            return Err(anyhow!("Gemini API error: {:?}", error));
        }

        let content = extract_text(&body)
            .ok_or_else(|| anyhow!("Failed to extract content from Gemini response"))?;
        let prompt_tokens = body["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0) as u32;
        let completion_tokens = body["usageMetadata"]["candidatesTokenCount"]
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
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            API_BASE, self.model, self.api_key
        );
        let response = self
            .client
            .post(url)
            .timeout(Duration::from_secs(options.timeout_secs))
            .json(&self.payload(messages, options))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Gemini stream request failed with status {}",
                response.status()
            ));
        }
        Ok(sse_token_stream(response, extract_text))
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/models?key={}", API_BASE, self.api_key))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

fn extract_text(value: &Value) -> Option<String> {
    value["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_map_to_gemini_vocabulary() {
        let provider = GeminiProvider::new("key", "gemini-1.5-flash").unwrap();
        let messages = vec![
            Message::system("be brief"),
            Message::user("hello"),
            Message::assistant("hi"),
        ];
        let payload = provider.payload(&messages, &CompletionOptions::default());
        assert_eq!(payload["contents"][0]["role"], json!("user"));
        assert_eq!(payload["contents"][1]["role"], json!("model"));
        assert_eq!(
            payload["system_instruction"]["parts"][0]["text"],
            json!("be brief")
        );
    }

    #[test]
    fn test_extract_text() {
        let body = json!({
            "candidates": [{"content": {"parts": [{"text": "answer"}]}}]
        });
        assert_eq!(extract_text(&body), Some("answer".to_string()));
        assert_eq!(extract_text(&json!({})), None);
    }

    #[test]
    fn test_flash_cheaper_than_pro() {
        let (flash_in, _) = GeminiProvider::pricing("gemini-1.5-flash");
        let (pro_in, _) = GeminiProvider::pricing("gemini-1.5-pro");
        assert!(flash_in < pro_in);
    }
}
