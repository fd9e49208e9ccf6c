// crates/loka-router/src/router.rs

//! The per-request decision pipeline
//!
//! Every request walks the same steps in order: memory recall, PII scan,
//! token gate, search augmentation, classification, provider selection,
//! budget pre-check, execution, post-recording. Recall and search failures
//! are non-fatal; budget exhaustion and provider failures convert into
//! local executions when the fallback policy allows; everything else
//! surfaces as a typed error.

use crate::delegation;
use crate::recall::MemoryRecall;
use crate::search::{format_as_context, SearchEngine};
use crate::trace::{TraceBuffer, TraceLog};
use anyhow::Result;
use log::{debug, warn};
use loka_core::classifier;
use loka_core::config::{LokaConfig, PiiAction};
use loka_core::error::LokaError;
use loka_core::pii;
use loka_core::types::{
    estimate_tokens, CompletionOptions, CompletionResult, Message, Role, RoutingDecision,
    RoutingReason, RoutingTier,
};
use loka_engines::{Provider, ProviderPool, TokenStream};
use loka_storage::budget::{BudgetLedger, CostRecord};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Assumed completion size for pre-execution cost estimates when the client
/// did not cap output tokens
const DEFAULT_OUTPUT_ESTIMATE: u32 = 512;

pub struct Router {
    pool: Arc<ProviderPool>,
    budget: Arc<BudgetLedger>,
    config: LokaConfig,
    recall: Option<MemoryRecall>,
    search: Option<SearchEngine>,
    trace_log: Arc<TraceLog>,
}

/// Explain-only output of `/v1/route`
#[derive(Debug, Serialize)]
pub struct RouteExplanation {
    pub tier: RoutingTier,
    pub model: String,
    pub reason: RoutingReason,
    pub complexity: f64,
    pub estimated_cost_eur: f64,
    pub trace: Vec<String>,
}

/// A selected-and-started streaming execution
pub struct StreamDecision {
    pub tier: RoutingTier,
    pub model: String,
    pub reason: RoutingReason,
    pub complexity: f64,
    pub stream: TokenStream,
}

impl Router {
    pub fn new(
        pool: Arc<ProviderPool>,
        budget: Arc<BudgetLedger>,
        config: LokaConfig,
        recall: Option<MemoryRecall>,
        search: Option<SearchEngine>,
        trace_log: Arc<TraceLog>,
    ) -> Self {
        Router {
            pool,
            budget,
            config,
            recall,
            search,
            trace_log,
        }
    }

    pub fn pool(&self) -> &Arc<ProviderPool> {
        &self.pool
    }

    pub fn budget(&self) -> &Arc<BudgetLedger> {
        &self.budget
    }

    /// Route and execute one request
    pub async fn route(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<RoutingDecision> {
        let mut trace = TraceBuffer::new(&short_id());
        let outcome = self.route_inner(messages, options, &mut trace).await;
        if let Ok(decision) = &outcome {
            self.post_record(decision, messages).await;
        }
        self.trace_log.append(&trace);
        outcome
    }

    async fn route_inner(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
        trace: &mut TraceBuffer,
    ) -> Result<RoutingDecision> {
        let mut working = messages.to_vec();
        let combined = combined_content(messages);

        // 1. memory recall, never fatal
        if let Some(recall) = &self.recall {
            match recall.recall(&combined).await {
                Ok(Some(context)) => {
                    working.insert(0, context);
                    trace.step("memory recall: context prepended");
                }
                Ok(None) => trace.step("memory recall: nothing relevant"),
                Err(e) => {
                    warn!("memory recall failed, continuing: {}", e);
                    trace.step("memory recall: failed (ignored)");
                }
            }
        }

        // 2. PII scan over the client's own messages
        let report = pii::scan(&combined);
        if !report.is_empty() {
            trace.step(&format!("pii scan: detected {:?}", report.type_names()));
            match self.config.router.pii_action {
                PiiAction::Block => {
                    return Err(LokaError::PiiBlocked {
                        types: report.type_names(),
                    }
                    .into());
                }
                PiiAction::Local => {
                    return self
                        .execute_local(&working, options, RoutingReason::PiiDetected, 0.0, trace)
                        .await;
                }
            }
        }
        trace.step("pii scan: clean");

        // 3. token gate
        let estimated_tokens_in = estimate_tokens(&combined);
        if estimated_tokens_in > self.config.router.max_local_tokens {
            trace.step(&format!(
                "token gate: {} > {}, forcing local",
                estimated_tokens_in, self.config.router.max_local_tokens
            ));
            return self
                .execute_local(&working, options, RoutingReason::TokenLimit, 0.0, trace)
                .await;
        }
        trace.step(&format!("token gate: {} tokens", estimated_tokens_in));

        // 4. search augmentation, never fatal
        let mut search_augmented = false;
        if let Some(search) = &self.search {
            if search.has_sources() {
                let query = last_user_content(messages);
                match search.run(&query).await {
                    Ok(results) if !results.is_empty() => {
                        working.insert(0, Message::system(format_as_context(&results)));
                        search_augmented = true;
                        trace.step(&format!("search: {} results prepended", results.len()));
                    }
                    Ok(_) => trace.step("search: no results"),
                    Err(e) => {
                        warn!("search augmentation failed, continuing: {}", e);
                        trace.step("search: failed (ignored)");
                    }
                }
            }
        }

        // 5. classify
        let classification = classifier::classify(
            &combined,
            self.config.router.complexity_local_threshold,
            self.config.router.complexity_cloud_threshold,
        );
        trace.step(&format!(
            "classified: {:.2} -> {}",
            classification.score, classification.tier
        ));

        // 6. select provider
        let (provider, tier) = self.select(classification.tier);
        let reason = if search_augmented {
            RoutingReason::SearchAugmented
        } else {
            reason_for(tier)
        };
        trace.step(&format!("selected: {} ({})", provider.name(), tier));

        // 7. budget pre-check; the reserved estimate is the ledgered cost
        let mut reserved = false;
        if tier != RoutingTier::Local {
            let estimated_cost = estimate_cost(provider.as_ref(), estimated_tokens_in, options);
            if estimated_cost > 0.0 {
                let reservation = CostRecord::new(
                    provider.model(),
                    estimated_tokens_in,
                    options.max_tokens.unwrap_or(DEFAULT_OUTPUT_ESTIMATE),
                    estimated_cost,
                    tier,
                );
                match self.budget.check_and_record(&reservation).await {
                    Ok(()) => {
                        reserved = true;
                        trace.step(&format!("budget: reserved {:.4} EUR", estimated_cost));
                    }
                    Err(e) if is_budget_exceeded(&e) => {
                        trace.step("budget: cap would be crossed");
                        if self.config.router.fallback_to_local {
                            return self
                                .execute_local(
                                    &working,
                                    options,
                                    RoutingReason::BudgetExceeded,
                                    classification.score,
                                    trace,
                                )
                                .await;
                        }
                        return Err(e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        // 8. execute; specialist tier goes through the delegation engine
        let executed = if tier == RoutingTier::Specialist {
            delegation::delegate(
                Arc::clone(&self.pool),
                &working,
                options,
                (
                    self.config.router.complexity_local_threshold,
                    self.config.router.complexity_cloud_threshold,
                ),
            )
            .await
            .map(|outcome| {
                let tier = if outcome.delegated {
                    RoutingTier::Delegated
                } else {
                    tier
                };
                (outcome.result, tier)
            })
        } else {
            provider
                .complete(&working, options)
                .await
                .map(|result| (result, tier))
        };

        match executed {
            Ok((result, executed_tier)) => {
                trace.step(&format!(
                    "executed on {} in {}ms",
                    result.model, result.latency_ms
                ));
                // 9. zero-cost rows keep query counts accurate when nothing
                // was reserved
                if !reserved {
                    let record = CostRecord::new(
                        &result.model,
                        result.prompt_tokens,
                        result.completion_tokens,
                        0.0,
                        executed_tier,
                    );
                    if let Err(e) = self.budget.record(&record).await {
                        warn!("zero-cost record failed (ignored): {}", e);
                    }
                }
                Ok(RoutingDecision {
                    tier: executed_tier,
                    model: result.model.clone(),
                    reason,
                    complexity: classification.score,
                    response: result,
                })
            }
            Err(e) => {
                trace.step(&format!("execution failed: {}", e));
                if self.config.router.fallback_to_local && tier != RoutingTier::Local {
                    warn!("{} failed, falling back to local: {}", provider.name(), e);
                    return self
                        .execute_local(
                            &working,
                            options,
                            RoutingReason::ProviderUnavailable,
                            classification.score,
                            trace,
                        )
                        .await;
                }
                Err(LokaError::ProviderUnavailable {
                    provider: provider.name().to_string(),
                    message: e.to_string(),
                }
                .into())
            }
        }
    }

    /// Explain-only pass: classification and selection without execution or
    /// ledger writes
    pub async fn route_explain(&self, messages: &[Message]) -> Result<RouteExplanation> {
        let mut trace = TraceBuffer::new(&short_id());
        let combined = combined_content(messages);

        let report = pii::scan(&combined);
        if !report.is_empty() {
            trace.step(&format!("pii scan: detected {:?}", report.type_names()));
            let local = self.pool.next_local();
            return Ok(RouteExplanation {
                tier: RoutingTier::Local,
                model: local.model().to_string(),
                reason: RoutingReason::PiiDetected,
                complexity: 0.0,
                estimated_cost_eur: 0.0,
                trace: trace.into_lines(),
            });
        }
        trace.step("pii scan: clean");

        let estimated_tokens_in = estimate_tokens(&combined);
        if estimated_tokens_in > self.config.router.max_local_tokens {
            trace.step("token gate: forcing local");
            let local = self.pool.next_local();
            return Ok(RouteExplanation {
                tier: RoutingTier::Local,
                model: local.model().to_string(),
                reason: RoutingReason::TokenLimit,
                complexity: 0.0,
                estimated_cost_eur: 0.0,
                trace: trace.into_lines(),
            });
        }
        trace.step(&format!("token gate: {} tokens", estimated_tokens_in));

        let classification = classifier::classify(
            &combined,
            self.config.router.complexity_local_threshold,
            self.config.router.complexity_cloud_threshold,
        );
        let (provider, tier) = self.select(classification.tier);
        trace.step(&format!(
            "classified: {:.2} -> {}, selected {}",
            classification.score,
            tier,
            provider.name()
        ));

        let estimated_cost_eur = if tier == RoutingTier::Local {
            0.0
        } else {
            estimate_cost(provider.as_ref(), estimated_tokens_in, &CompletionOptions::default())
        };

        Ok(RouteExplanation {
            tier,
            model: provider.model().to_string(),
            reason: reason_for(tier),
            complexity: classification.score,
            estimated_cost_eur,
            trace: trace.into_lines(),
        })
    }

    /// Route and start a streaming execution
    pub async fn route_stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<StreamDecision> {
        let mut trace = TraceBuffer::new(&short_id());
        let combined = combined_content(messages);

        let report = pii::scan(&combined);
        if !report.is_empty() {
            if self.config.router.pii_action == PiiAction::Block {
                return Err(LokaError::PiiBlocked {
                    types: report.type_names(),
                }
                .into());
            }
            trace.step("pii scan: detected, streaming locally");
            let decision = self
                .open_local_stream(messages, options, RoutingReason::PiiDetected, 0.0)
                .await;
            self.trace_log.append(&trace);
            return decision;
        }

        let estimated_tokens_in = estimate_tokens(&combined);
        if estimated_tokens_in > self.config.router.max_local_tokens {
            trace.step("token gate: streaming locally");
            let decision = self
                .open_local_stream(messages, options, RoutingReason::TokenLimit, 0.0)
                .await;
            self.trace_log.append(&trace);
            return decision;
        }

        let classification = classifier::classify(
            &combined,
            self.config.router.complexity_local_threshold,
            self.config.router.complexity_cloud_threshold,
        );
        let (provider, tier) = self.select(classification.tier);
        trace.step(&format!(
            "classified: {:.2} -> {}, streaming from {}",
            classification.score,
            tier,
            provider.name()
        ));

        if tier != RoutingTier::Local {
            let estimated_cost = estimate_cost(provider.as_ref(), estimated_tokens_in, options);
            if estimated_cost > 0.0 {
                let reservation = CostRecord::new(
                    provider.model(),
                    estimated_tokens_in,
                    options.max_tokens.unwrap_or(DEFAULT_OUTPUT_ESTIMATE),
                    estimated_cost,
                    tier,
                );
                if let Err(e) = self.budget.check_and_record(&reservation).await {
                    if is_budget_exceeded(&e) && self.config.router.fallback_to_local {
                        trace.step("budget: cap would be crossed, streaming locally");
                        let decision = self
                            .open_local_stream(
                                messages,
                                options,
                                RoutingReason::BudgetExceeded,
                                classification.score,
                            )
                            .await;
                        self.trace_log.append(&trace);
                        return decision;
                    }
                    return Err(e);
                }
            }
        }

        // the delegation engine does not stream; its assembled report is
        // replayed as a single fragment
        if tier == RoutingTier::Specialist {
            let outcome = delegation::delegate(
                Arc::clone(&self.pool),
                messages,
                options,
                (
                    self.config.router.complexity_local_threshold,
                    self.config.router.complexity_cloud_threshold,
                ),
            )
            .await?;
            let tier = if outcome.delegated {
                RoutingTier::Delegated
            } else {
                tier
            };
            self.trace_log.append(&trace);
            let fragments: Vec<anyhow::Result<String>> = vec![Ok(outcome.result.content)];
            return Ok(StreamDecision {
                tier,
                model: outcome.result.model,
                reason: reason_for(RoutingTier::Specialist),
                complexity: classification.score,
                stream: Box::pin(futures::stream::iter(fragments)),
            });
        }

        match provider.stream(messages, options).await {
            Ok(stream) => {
                self.trace_log.append(&trace);
                Ok(StreamDecision {
                    tier,
                    model: provider.model().to_string(),
                    reason: reason_for(tier),
                    complexity: classification.score,
                    stream,
                })
            }
            Err(e) if self.config.router.fallback_to_local && tier != RoutingTier::Local => {
                warn!("{} stream failed, falling back to local: {}", provider.name(), e);
                trace.step("stream failed, falling back to local");
                let decision = self
                    .open_local_stream(
                        messages,
                        options,
                        RoutingReason::ProviderUnavailable,
                        classification.score,
                    )
                    .await;
                self.trace_log.append(&trace);
                decision
            }
            Err(e) => Err(LokaError::ProviderUnavailable {
                provider: provider.name().to_string(),
                message: e.to_string(),
            }
            .into()),
        }
    }

    async fn open_local_stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
        reason: RoutingReason,
        complexity: f64,
    ) -> Result<StreamDecision> {
        let provider = self.pool.next_local();
        let stream = provider.stream(messages, options).await.map_err(|e| {
            LokaError::ProviderUnavailable {
                provider: provider.name().to_string(),
                message: e.to_string(),
            }
        })?;
        let record = CostRecord::new(
            provider.model(),
            estimate_tokens(&combined_content(messages)),
            0,
            0.0,
            RoutingTier::Local,
        );
        if let Err(e) = self.budget.record(&record).await {
            warn!("zero-cost record failed (ignored): {}", e);
        }
        Ok(StreamDecision {
            tier: RoutingTier::Local,
            model: provider.model().to_string(),
            reason,
            complexity,
            stream,
        })
    }

    /// Short-circuit and fallback executions land here
    async fn execute_local(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
        reason: RoutingReason,
        complexity: f64,
        trace: &mut TraceBuffer,
    ) -> Result<RoutingDecision> {
        let provider = self.pool.next_local();
        let result = provider.complete(messages, options).await.map_err(|e| {
            LokaError::ProviderUnavailable {
                provider: provider.name().to_string(),
                message: e.to_string(),
            }
        })?;
        trace.step(&format!("executed locally on {} ({})", provider.name(), reason));

        let record = CostRecord::new(
            &result.model,
            result.prompt_tokens,
            result.completion_tokens,
            0.0,
            RoutingTier::Local,
        );
        if let Err(e) = self.budget.record(&record).await {
            warn!("zero-cost record failed (ignored): {}", e);
        }

        Ok(RoutingDecision {
            tier: RoutingTier::Local,
            model: result.model.clone(),
            reason,
            complexity,
            response: result,
        })
    }

    /// The provider-selection rule, including the zero-cost-cloud retarget
    fn select(&self, tier: RoutingTier) -> (Arc<dyn Provider>, RoutingTier) {
        match tier {
            RoutingTier::Local | RoutingTier::Delegated => (self.pool.next_local(), RoutingTier::Local),
            RoutingTier::Specialist => {
                let provider = self
                    .pool
                    .specialist()
                    .unwrap_or_else(|| self.pool.next_local());
                (provider, RoutingTier::Specialist)
            }
            RoutingTier::Cloud => {
                // a keyless setup fills the cloud slot with a local adapter;
                // prefer a paid specialist over silently downgrading
                if self.pool.cloud_is_zero_cost() {
                    if let Some(specialist) = self.pool.specialist() {
                        if specialist.cost_per_1k_input_eur() > 0.0 {
                            debug!("cloud slot is zero-cost, retargeting to specialist");
                            return (specialist, RoutingTier::Cloud);
                        }
                    }
                }
                (self.pool.cloud(), RoutingTier::Cloud)
            }
        }
    }

    /// Side-channel bookkeeping after a successful decision; never fails the
    /// request
    async fn post_record(&self, decision: &RoutingDecision, original: &[Message]) {
        if let Err(e) = self
            .budget
            .record_query(
                decision.tier,
                decision.reason,
                &decision.model,
                decision.complexity,
            )
            .await
        {
            warn!("query log write failed (ignored): {}", e);
        }
        if let Some(recall) = &self.recall {
            let user = last_user_content(original);
            if !user.is_empty() {
                if let Err(e) = recall.remember(&user, &decision.response.content).await {
                    warn!("memory write failed (ignored): {}", e);
                }
            }
        }
    }
}

fn combined_content(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn last_user_content(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

fn reason_for(tier: RoutingTier) -> RoutingReason {
    match tier {
        RoutingTier::Local => RoutingReason::LowComplexity,
        RoutingTier::Specialist | RoutingTier::Delegated => RoutingReason::MediumComplexity,
        RoutingTier::Cloud => RoutingReason::HighComplexity,
    }
}

fn estimate_cost(provider: &dyn Provider, input_tokens: u32, options: &CompletionOptions) -> f64 {
    let output_tokens = options.max_tokens.unwrap_or(DEFAULT_OUTPUT_ESTIMATE);
    f64::from(input_tokens) / 1000.0 * provider.cost_per_1k_input_eur()
        + f64::from(output_tokens) / 1000.0 * provider.cost_per_1k_output_eur()
}

fn is_budget_exceeded(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<LokaError>(),
        Some(LokaError::BudgetExceeded { .. })
    )
}

fn short_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use futures::StreamExt;
    use loka_core::config::BudgetLimits;

    const COMPLEX_PROMPT: &str = "Compare the trade-off between a distributed architecture and a \
        monolith, and explain why performance differs under load. Analyse the implications step \
        by step, because we must evaluate how each design scales; therefore outline the \
        rationale. First, consider this error from `api.service.ts`:\n```\nTypeError: cannot \
        read dispatch of undefined\n    at Router.handle (src/router.ts:42:7)\n```";

    struct Fixture {
        router: Router,
    }

    async fn fixture(
        cloud: ScriptedProvider,
        specialist: Option<ScriptedProvider>,
        configure: impl FnOnce(&mut LokaConfig),
    ) -> Fixture {
        let local: Arc<dyn Provider> = Arc::new(ScriptedProvider::local("local-a", "local says hi"));
        let pool = Arc::new(ProviderPool::new(
            vec![local],
            specialist.map(|s| Arc::new(s) as Arc<dyn Provider>),
            Arc::new(cloud),
        ));
        let mut config = LokaConfig::default();
        configure(&mut config);
        let budget = Arc::new(
            BudgetLedger::in_memory(config.budget).await.unwrap(),
        );
        let dir = tempfile::tempdir().unwrap();
        let trace_log = Arc::new(TraceLog::new(dir.path().join("loka-router.log")));
        Fixture {
            router: Router::new(pool, budget, config, None, None, trace_log),
        }
    }

    fn default_budget() -> BudgetLimits {
        BudgetLimits::default()
    }

    #[tokio::test]
    async fn test_trivial_prompt_routes_local_at_zero_cost() {
        let f = fixture(ScriptedProvider::cloud("cloud", vec![]), None, |c| {
            c.budget = default_budget();
        })
        .await;

        let decision = f
            .router
            .route(&[Message::user("What is 2 + 2?")], &CompletionOptions::default())
            .await
            .unwrap();

        assert_eq!(decision.tier, RoutingTier::Local);
        assert_eq!(decision.reason, RoutingReason::LowComplexity);
        assert!(decision.complexity < 0.35);
        assert_eq!(decision.response.cost_eur, 0.0);
    }

    #[tokio::test]
    async fn test_pii_short_circuits_to_local_with_zero_score() {
        let cloud = ScriptedProvider::cloud("cloud", vec![]);
        let f = fixture(cloud, None, |_| {}).await;

        let decision = f
            .router
            .route(
                &[Message::user("Send invoice to customer@example.com")],
                &CompletionOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(decision.tier, RoutingTier::Local);
        assert_eq!(decision.reason, RoutingReason::PiiDetected);
        assert_eq!(decision.complexity, 0.0);
        assert_eq!(decision.response.cost_eur, 0.0);
    }

    #[tokio::test]
    async fn test_iban_short_circuits_to_local() {
        let f = fixture(ScriptedProvider::cloud("cloud", vec![]), None, |_| {}).await;
        let decision = f
            .router
            .route(
                &[Message::user("Transfer to NL91ABNA0417164300 please")],
                &CompletionOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(decision.tier, RoutingTier::Local);
        assert_eq!(decision.reason, RoutingReason::PiiDetected);
    }

    #[tokio::test]
    async fn test_pii_block_action_fails_without_values() {
        let f = fixture(ScriptedProvider::cloud("cloud", vec![]), None, |c| {
            c.router.pii_action = PiiAction::Block;
        })
        .await;

        let err = f
            .router
            .route(
                &[Message::user("Send invoice to customer@example.com")],
                &CompletionOptions::default(),
            )
            .await
            .unwrap_err();

        let loka = err.downcast_ref::<LokaError>().unwrap();
        assert!(matches!(loka, LokaError::PiiBlocked { .. }));
        assert!(!err.to_string().contains("example.com"));
    }

    #[tokio::test]
    async fn test_token_gate_forces_local() {
        let f = fixture(ScriptedProvider::cloud("cloud", vec![]), None, |c| {
            c.router.max_local_tokens = 10;
        })
        .await;

        let long_prompt = "word ".repeat(50);
        let decision = f
            .router
            .route(&[Message::user(long_prompt)], &CompletionOptions::default())
            .await
            .unwrap();

        assert_eq!(decision.tier, RoutingTier::Local);
        assert_eq!(decision.reason, RoutingReason::TokenLimit);
    }

    #[tokio::test]
    async fn test_complex_prompt_reaches_cloud_and_reserves_budget() {
        let cloud = ScriptedProvider::cloud("cloud", vec!["cloud answer".to_string()]);
        let f = fixture(cloud, None, |_| {}).await;

        let decision = f
            .router
            .route(&[Message::user(COMPLEX_PROMPT)], &CompletionOptions::default())
            .await
            .unwrap();

        assert_eq!(decision.tier, RoutingTier::Cloud);
        assert_eq!(decision.reason, RoutingReason::HighComplexity);
        assert!(decision.complexity > 0.65);

        let summary = f.router.budget().summary().await.unwrap();
        assert!(summary.today_eur > 0.0);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_falls_back_to_local() {
        let cloud = ScriptedProvider::cloud("cloud", vec!["cloud answer".to_string()]);
        let f = fixture(cloud, None, |c| {
            c.budget.daily_eur = 0.000001;
        })
        .await;

        let decision = f
            .router
            .route(&[Message::user(COMPLEX_PROMPT)], &CompletionOptions::default())
            .await
            .unwrap();

        assert_eq!(decision.tier, RoutingTier::Local);
        assert_eq!(decision.reason, RoutingReason::BudgetExceeded);
        assert_eq!(decision.response.cost_eur, 0.0);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_surfaces_when_fallback_disabled() {
        let cloud = ScriptedProvider::cloud("cloud", vec![]);
        let f = fixture(cloud, None, |c| {
            c.budget.daily_eur = 0.000001;
            c.router.fallback_to_local = false;
        })
        .await;

        let err = f
            .router
            .route(&[Message::user(COMPLEX_PROMPT)], &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LokaError>(),
            Some(LokaError::BudgetExceeded { period: "daily", .. })
        ));
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back_to_local() {
        let f = fixture(ScriptedProvider::broken("cloud"), None, |_| {}).await;

        let decision = f
            .router
            .route(&[Message::user(COMPLEX_PROMPT)], &CompletionOptions::default())
            .await
            .unwrap();

        assert_eq!(decision.tier, RoutingTier::Local);
        assert_eq!(decision.reason, RoutingReason::ProviderUnavailable);
        assert_eq!(decision.response.content, "local says hi");
    }

    #[tokio::test]
    async fn test_provider_failure_surfaces_when_fallback_disabled() {
        let f = fixture(ScriptedProvider::broken("cloud"), None, |c| {
            c.router.fallback_to_local = false;
        })
        .await;

        let err = f
            .router
            .route(&[Message::user(COMPLEX_PROMPT)], &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LokaError>(),
            Some(LokaError::ProviderUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_specialist_tier_delegates() {
        let specialist = ScriptedProvider::cloud(
            "specialist",
            vec![r#"{"subtasks": ["first piece", "second piece"]}"#.to_string()],
        );
        let f = fixture(ScriptedProvider::cloud("cloud", vec![]), Some(specialist), |_| {}).await;

        let medium = "Explain why a distributed cache would improve performance here, because \
                      the workload is read-heavy. However, compare the main trade-offs against \
                      a local cache and analyse which architecture fits.";
        let decision = f
            .router
            .route(&[Message::user(medium)], &CompletionOptions::default())
            .await
            .unwrap();

        assert_eq!(decision.tier, RoutingTier::Delegated);
        assert!(decision.response.content.contains("Plan: 2 subtasks"));
    }

    #[tokio::test]
    async fn test_zero_cost_cloud_retargets_to_specialist() {
        let specialist = ScriptedProvider::cloud("specialist", vec!["expert answer".to_string()]);
        let local_cloud = ScriptedProvider::local("cloud-standin", "cheap answer");
        let f = fixture(local_cloud, Some(specialist), |_| {}).await;

        let decision = f
            .router
            .route(&[Message::user(COMPLEX_PROMPT)], &CompletionOptions::default())
            .await
            .unwrap();

        assert_eq!(decision.tier, RoutingTier::Cloud);
        assert_eq!(decision.response.content, "expert answer");
    }

    #[tokio::test]
    async fn test_route_explain_does_not_execute_or_spend() {
        let cloud = ScriptedProvider::cloud("cloud", vec!["never used".to_string()]);
        let f = fixture(cloud, None, |_| {}).await;

        let explanation = f
            .router
            .route_explain(&[Message::user(COMPLEX_PROMPT)])
            .await
            .unwrap();

        assert_eq!(explanation.tier, RoutingTier::Cloud);
        assert!(explanation.estimated_cost_eur > 0.0);
        assert!(!explanation.trace.is_empty());

        let summary = f.router.budget().summary().await.unwrap();
        assert_eq!(summary.query_count, 0);
    }

    #[tokio::test]
    async fn test_route_stream_local_preserves_content() {
        let f = fixture(ScriptedProvider::cloud("cloud", vec![]), None, |_| {}).await;

        let decision = f
            .router
            .route_stream(&[Message::user("What is 2 + 2?")], &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(decision.tier, RoutingTier::Local);

        let fragments: Vec<String> = decision
            .stream
            .map(|f| f.unwrap())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(fragments.join(""), "local says hi");
    }
}
