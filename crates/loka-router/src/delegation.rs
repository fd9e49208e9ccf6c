// crates/loka-router/src/delegation.rs

//! The delegation engine
//!
//! Specialist-tier requests are offered to a planner model, which emits a
//! JSON plan of subtasks. Subtasks run concurrently on the local workers;
//! a subtask the classifier still deems non-local is re-planned recursively
//! up to a bounded depth, at which point the specialist executes it directly
//! rather than settling for a low-quality local answer. A malformed plan
//! degrades gracefully to one plain specialist completion.

use crate::dag::{execute_graph, TaskGraph};
use crate::strip_code_fences;
use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, warn};
use loka_core::classifier;
use loka_core::types::{CompletionOptions, CompletionResult, Message, RoutingTier};
use loka_engines::{Provider, ProviderPool};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const MAX_DEPTH: usize = 2;
const MAX_ATTEMPTS: usize = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);
/// Reporting heuristic for the telemetry footer, not a billing figure
const CLOUD_COST_PER_SUBTASK_EUR: f64 = 0.02;

#[derive(Debug, Deserialize)]
struct Plan {
    subtasks: Vec<String>,
}

/// What the engine produced, and whether a plan actually expanded
pub struct DelegationOutcome {
    pub result: CompletionResult,
    pub delegated: bool,
}

/// Entry point from the router for specialist-tier requests
pub async fn delegate(
    pool: Arc<ProviderPool>,
    messages: &[Message],
    options: &CompletionOptions,
    thresholds: (f64, f64),
) -> Result<DelegationOutcome> {
    let planner = pool.specialist().unwrap_or_else(|| pool.next_local());
    let query = messages
        .iter()
        .rev()
        .find(|m| m.role == loka_core::types::Role::User)
        .map(|m| m.content.clone())
        .unwrap_or_default();

    let plan_prompt = format!(
        "Break this request into independent subtasks that can run in parallel.\n\
         Respond with a JSON object of the form {{\"subtasks\": [\"...\"]}}.\n\
         Do not use markdown fences. No prose outside the JSON.\n\
         Request: {}",
        query
    );
    let plan_completion = planner
        .complete(&[Message::user(plan_prompt)], options)
        .await?;

    let subtasks = match parse_plan(&plan_completion.content) {
        Some(subtasks) if !subtasks.is_empty() => subtasks,
        _ => {
            warn!("planner emitted no usable plan, executing directly");
            let result = planner.complete(messages, options).await?;
            return Ok(DelegationOutcome {
                result,
                delegated: false,
            });
        }
    };
    debug!("plan expanded into {} subtasks", subtasks.len());

    let graph = TaskGraph::from_subtasks(&Uuid::new_v4().to_string(), &query, &subtasks)?;
    let history: Arc<Vec<Message>> = Arc::new(messages.to_vec());
    let worker_pool = Arc::clone(&pool);
    let worker_options = options.clone();

    let results = execute_graph(&graph, move |node, index| {
        recursive_subtask(
            Arc::clone(&worker_pool),
            node.description,
            Arc::clone(&history),
            0,
            MAX_DEPTH,
            index,
            worker_options.clone(),
            thresholds,
        )
    })
    .await?;

    // ordered assembly with the telemetry footer
    let mut content = format!("Plan: {} subtasks\n", subtasks.len());
    let mut prompt_tokens = plan_completion.prompt_tokens;
    let mut completion_tokens = plan_completion.completion_tokens;
    let mut cost_eur = plan_completion.cost_eur;
    let mut max_worker_latency = 0;
    for (i, node) in graph.nodes.iter().enumerate() {
        let result = &results[&node.id];
        content.push_str(&format!("\n## Subtask {}: {}\n{}\n", i + 1, node.description, result.content));
        prompt_tokens += result.prompt_tokens;
        completion_tokens += result.completion_tokens;
        cost_eur += result.cost_eur;
        max_worker_latency = max_worker_latency.max(result.latency_ms);
    }
    let worker_tokens: u32 = graph
        .nodes
        .iter()
        .map(|n| results[&n.id].prompt_tokens + results[&n.id].completion_tokens)
        .sum();
    let savings = CLOUD_COST_PER_SUBTASK_EUR * subtasks.len() as f64 - cost_eur;
    content.push_str(&format!(
        "\n---\nplanner: {} | planner tokens: {} | worker tokens: {} | est. savings vs cloud: {:.4} EUR\n",
        plan_completion.model,
        plan_completion.prompt_tokens + plan_completion.completion_tokens,
        worker_tokens,
        savings.max(0.0)
    ));

    Ok(DelegationOutcome {
        result: CompletionResult {
            content,
            model: plan_completion.model.clone(),
            prompt_tokens,
            completion_tokens,
            cost_eur,
            // workers ran concurrently
            latency_ms: plan_completion.latency_ms + max_worker_latency,
        },
        delegated: true,
    })
}

/// Tolerates a fenced blob despite the prompt forbidding fences
fn parse_plan(content: &str) -> Option<Vec<String>> {
    let cleaned = strip_code_fences(content);
    serde_json::from_str::<Plan>(&cleaned).ok().map(|p| p.subtasks)
}

/// Execute one subtask, re-planning non-trivial ones until the depth cap
#[allow(clippy::too_many_arguments)]
fn recursive_subtask(
    pool: Arc<ProviderPool>,
    task: String,
    history: Arc<Vec<Message>>,
    depth: usize,
    max_depth: usize,
    index: usize,
    options: CompletionOptions,
    thresholds: (f64, f64),
) -> BoxFuture<'static, Result<CompletionResult>> {
    async move {
        let classification = classifier::classify(&task, thresholds.0, thresholds.1);

        if classification.tier == RoutingTier::Local || depth >= max_depth {
            // at the depth cap a still-complex leaf goes to the specialist
            // so quality does not degrade with depth
            let provider = if classification.tier != RoutingTier::Local && depth >= max_depth {
                pool.specialist().unwrap_or_else(|| pool.local_at(index))
            } else {
                pool.local_at(index)
            };
            return execute_with_retry(provider, &history, &task, &options).await;
        }

        let planner = pool.specialist().unwrap_or_else(|| pool.local_at(index));
        let replan_prompt = format!(
            "Break this task into 1-3 simpler subtasks.\n\
             Respond with a JSON object of the form {{\"subtasks\": [\"...\"]}}.\n\
             Do not use markdown fences.\n\
             Task: {}",
            task
        );
        let replan = planner
            .complete(&[Message::user(replan_prompt)], &options)
            .await?;
        let nested = match parse_plan(&replan.content) {
            Some(nested) if !nested.is_empty() => nested.into_iter().take(3).collect::<Vec<_>>(),
            _ => {
                debug!("replan at depth {} unusable, executing directly", depth);
                return execute_with_retry(planner, &history, &task, &options).await;
            }
        };

        let mut handles = Vec::with_capacity(nested.len());
        for (i, sub) in nested.iter().enumerate() {
            handles.push(tokio::spawn(recursive_subtask(
                Arc::clone(&pool),
                sub.clone(),
                Arc::clone(&history),
                depth + 1,
                max_depth,
                i,
                options.clone(),
                thresholds,
            )));
        }

        let mut contents = Vec::with_capacity(nested.len());
        let mut prompt_tokens = replan.prompt_tokens;
        let mut completion_tokens = replan.completion_tokens;
        let mut cost_eur = replan.cost_eur;
        let mut max_child_latency = 0;
        for handle in handles {
            let child = handle
                .await
                .map_err(|e| anyhow::anyhow!("subtask panicked: {}", e))??;
            prompt_tokens += child.prompt_tokens;
            completion_tokens += child.completion_tokens;
            cost_eur += child.cost_eur;
            max_child_latency = max_child_latency.max(child.latency_ms);
            contents.push(child.content);
        }

        Ok(CompletionResult {
            content: contents.join("\n\n"),
            model: replan.model,
            prompt_tokens,
            completion_tokens,
            cost_eur,
            latency_ms: replan.latency_ms + max_child_latency,
        })
    }
    .boxed()
}

async fn execute_with_retry(
    provider: Arc<dyn Provider>,
    history: &[Message],
    task: &str,
    options: &CompletionOptions,
) -> Result<CompletionResult> {
    let mut messages = history.to_vec();
    messages.push(Message::user(task));
    let mut last_error = None;
    for attempt in 0..MAX_ATTEMPTS {
        match provider.complete(&messages, options).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                warn!(
                    "subtask attempt {}/{} on {} failed: {}",
                    attempt + 1,
                    MAX_ATTEMPTS,
                    provider.name(),
                    e
                );
                last_error = Some(e);
                if attempt + 1 < MAX_ATTEMPTS {
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }
    Err(last_error.expect("at least one attempt ran"))
}
