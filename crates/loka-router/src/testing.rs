// crates/loka-router/src/testing.rs

//! Scripted providers for exercising the router without a network

use async_trait::async_trait;
use loka_core::types::{estimate_tokens, CompletionOptions, CompletionResult, Message};
use loka_engines::{Provider, TokenStream};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Fixed latency every scripted completion reports
pub const SCRIPTED_LATENCY_MS: u64 = 5;

pub struct ScriptedProvider {
    name: String,
    model: String,
    input_rate: f64,
    output_rate: f64,
    /// Responses served in order; when exhausted, the last one repeats
    responses: Mutex<VecDeque<String>>,
    fallback: String,
    /// Fail this many calls before serving responses
    failures_remaining: AtomicUsize,
    pub calls: AtomicUsize,
    healthy: bool,
}

impl ScriptedProvider {
    pub fn new(
        name: &str,
        model: &str,
        input_rate: f64,
        output_rate: f64,
        responses: Vec<String>,
    ) -> Self {
        ScriptedProvider {
            name: name.to_string(),
            model: model.to_string(),
            input_rate,
            output_rate,
            responses: Mutex::new(responses.into()),
            fallback: "ok".to_string(),
            failures_remaining: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            healthy: true,
        }
    }

    /// A zero-cost worker that always answers the same thing
    pub fn local(name: &str, reply: &str) -> Self {
        let mut provider = ScriptedProvider::new(name, "llama3.2:3b", 0.0, 0.0, Vec::new());
        provider.fallback = reply.to_string();
        provider
    }

    /// A paid provider with a response script
    pub fn cloud(name: &str, responses: Vec<String>) -> Self {
        ScriptedProvider::new(name, "scripted-large", 0.003, 0.015, responses)
    }

    /// A zero-cost worker that fails `failures` times, then recovers
    pub fn flaky_local(name: &str, failures: usize, reply: &str) -> Self {
        let provider = ScriptedProvider::local(name, reply);
        provider.failures_remaining.store(failures, Ordering::SeqCst);
        provider
    }

    /// A provider whose every call fails
    pub fn broken(name: &str) -> Self {
        let provider = ScriptedProvider::new(name, "broken-model", 0.003, 0.015, Vec::new());
        provider.failures_remaining.store(usize::MAX, Ordering::SeqCst);
        provider
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    fn next_response(&self) -> String {
        let mut responses = self.responses.lock().expect("script lock");
        responses.pop_front().unwrap_or_else(|| self.fallback.clone())
    }

    fn should_fail(&self) -> bool {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining == 0 {
            return false;
        }
        if remaining != usize::MAX {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
        }
        true
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
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
        _options: &CompletionOptions,
    ) -> anyhow::Result<CompletionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail() {
            return Err(anyhow::anyhow!("{} scripted failure", self.name));
        }
        let content = self.next_response();
        let joined: String = messages.iter().map(|m| m.content.as_str()).collect();
        let prompt_tokens = estimate_tokens(&joined);
        let completion_tokens = estimate_tokens(&content).max(1);
        let cost_eur = f64::from(prompt_tokens) / 1000.0 * self.input_rate
            + f64::from(completion_tokens) / 1000.0 * self.output_rate;
        Ok(CompletionResult {
            content,
            model: self.model.clone(),
            prompt_tokens,
            completion_tokens,
            cost_eur,
            latency_ms: SCRIPTED_LATENCY_MS,
        })
    }

    async fn stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> anyhow::Result<TokenStream> {
        let result = self.complete(messages, options).await?;
        let fragments: Vec<anyhow::Result<String>> = result
            .content
            .split_inclusive(' ')
            .map(|s| Ok(s.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(fragments)))
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }
}
