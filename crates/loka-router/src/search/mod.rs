// crates/loka-router/src/search/mod.rs

//! Web search augmentation
//!
//! Pipeline: expand the query into sub-queries with the local model, fan the
//! (source x sub-query) fetches out concurrently with per-task isolation,
//! dedupe by normalised URL, then let the local model score relevance 0-10
//! and keep everything at or above the threshold. If filtering would drop
//! every result, the unfiltered list is returned instead.

pub mod sources;

use crate::strip_code_fences;
use anyhow::Result;
use futures::future::join_all;
use log::{debug, warn};
use loka_core::types::{CompletionOptions, Message};
use loka_engines::Provider;
use self::sources::SearchSource;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Relevance 0-10 assigned during re-ranking
    pub score: Option<f64>,
}

pub struct SearchEngine {
    sources: Vec<Arc<dyn SearchSource>>,
    planner: Arc<dyn Provider>,
    min_score: f64,
    max_results: usize,
}

impl SearchEngine {
    pub fn new(
        sources: Vec<Arc<dyn SearchSource>>,
        planner: Arc<dyn Provider>,
        min_score: f64,
        max_results: usize,
    ) -> Self {
        SearchEngine {
            sources,
            planner,
            min_score,
            max_results,
        }
    }

    /// Build the engine with the stock sources that are available right now
    pub fn with_default_sources(
        planner: Arc<dyn Provider>,
        enabled: &[String],
        min_score: f64,
        max_results: usize,
    ) -> Self {
        let mut source_list: Vec<Arc<dyn SearchSource>> = Vec::new();
        if enabled.iter().any(|s| s == "web") {
            match sources::WebSearchSource::from_env() {
                Some(web) => source_list.push(Arc::new(web)),
                None => debug!("web search source omitted: BRAVE_SEARCH_API_KEY not set"),
            }
        }
        if enabled.iter().any(|s| s == "papers") {
            if let Some(papers) = sources::PaperSearchSource::new() {
                source_list.push(Arc::new(papers));
            }
        }
        SearchEngine::new(source_list, planner, min_score, max_results)
    }

    pub fn has_sources(&self) -> bool {
        !self.sources.is_empty()
    }

    /// The full expand -> fetch -> re-rank pipeline
    pub async fn run(&self, query: &str) -> Result<Vec<SearchResult>> {
        let sub_queries = self.expand(query).await;
        debug!("search expansion: {:?}", sub_queries);

        let mut fetches = Vec::new();
        for source in &self.sources {
            if !source.is_available(query) {
                continue;
            }
            for sub_query in &sub_queries {
                let source = Arc::clone(source);
                let sub_query = sub_query.clone();
                fetches.push(tokio::spawn(async move {
                    match source.search(&sub_query).await {
                        Ok(results) => results,
                        Err(e) => {
                            warn!("search source {} failed for '{}': {}", source.name(), sub_query, e);
                            Vec::new()
                        }
                    }
                }));
            }
        }

        let mut merged: Vec<SearchResult> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for outcome in join_all(fetches).await {
            let Ok(results) = outcome else { continue };
            for result in results {
                if seen.insert(normalize_url(&result.url)) {
                    merged.push(result);
                }
            }
        }
        if merged.is_empty() {
            return Ok(Vec::new());
        }

        let ranked = self.rerank(query, merged).await;
        Ok(ranked)
    }

    /// 2-3 focused sub-queries from the local model, or just the original
    async fn expand(&self, query: &str) -> Vec<String> {
        let prompt = format!(
            "Split this query into 2-3 focused web search queries.\n\
             Respond with a JSON array of strings only. No markdown fences, no prose.\n\
             Query: {}",
            query
        );
        let messages = [Message::user(prompt)];
        match self.planner.complete(&messages, &CompletionOptions::default()).await {
            Ok(result) => {
                let cleaned = strip_code_fences(&result.content);
                match serde_json::from_str::<Vec<String>>(&cleaned) {
                    Ok(queries) if !queries.is_empty() => queries.into_iter().take(3).collect(),
                    _ => vec![query.to_string()],
                }
            }
            Err(e) => {
                debug!("query expansion failed, using original: {}", e);
                vec![query.to_string()]
            }
        }
    }

    /// Model-scored relevance filter with the all-dropped safety fallback
    async fn rerank(&self, query: &str, results: Vec<SearchResult>) -> Vec<SearchResult> {
        let listing: String = results
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{}. {} — {}", i + 1, r.title, r.snippet))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Score each search result 0-10 for relevance to the query.\n\
             Respond with a JSON array of numbers, one per result, nothing else.\n\
             Query: {}\nResults:\n{}",
            query, listing
        );
        let messages = [Message::user(prompt)];
        let scores: Vec<f64> = match self
            .planner
            .complete(&messages, &CompletionOptions::default())
            .await
        {
            Ok(completion) => {
                match serde_json::from_str(&strip_code_fences(&completion.content)) {
                    Ok(scores) => scores,
                    Err(e) => {
                        debug!("re-rank parse failed, keeping original order: {}", e);
                        return self.truncate(results);
                    }
                }
            }
            Err(e) => {
                debug!("re-rank call failed, keeping original order: {}", e);
                return self.truncate(results);
            }
        };
        if scores.len() != results.len() {
            debug!("re-rank score count mismatch, keeping original order");
            return self.truncate(results);
        }

        let scored: Vec<SearchResult> = results
            .into_iter()
            .zip(scores)
            .map(|(mut result, score)| {
                result.score = Some(score.clamp(0.0, 10.0));
                result
            })
            .collect();

        let mut kept: Vec<SearchResult> = scored
            .iter()
            .filter(|r| r.score.unwrap_or(0.0) >= self.min_score)
            .cloned()
            .collect();
        // the filter never empties the list outright
        if kept.is_empty() {
            kept = scored;
        }
        kept.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.truncate(kept)
    }

    fn truncate(&self, mut results: Vec<SearchResult>) -> Vec<SearchResult> {
        results.truncate(self.max_results);
        results
    }
}

fn normalize_url(url: &str) -> String {
    url.to_lowercase().trim_end_matches('/').to_string()
}

/// Render results as the synthetic system message prepended to the request
pub fn format_as_context(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return String::new();
    }
    let mut out = String::from("Web Search Context:\n");
    for (i, result) in results.iter().enumerate() {
        out.push_str(&format!(
            "{}. {} ({})\n   {}\n",
            i + 1,
            result.title,
            result.url,
            result.snippet
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(title: &str, url: &str) -> SearchResult {
        SearchResult {
            title: title.to_string(),
            url: url.to_string(),
            snippet: format!("snippet for {}", title),
            score: None,
        }
    }

    #[test]
    fn test_format_as_context_empty_is_empty_string() {
        assert_eq!(format_as_context(&[]), "");
    }

    #[test]
    fn test_format_as_context_numbers_every_result() {
        let results = vec![result("One", "https://a.example"), result("Two", "https://b.example")];
        let context = format_as_context(&results);
        assert!(context.contains("Web Search Context"));
        assert!(context.contains("1. One"));
        assert!(context.contains("2. Two"));
        assert!(context.contains("https://b.example"));
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("HTTPS://Example.com/Path/"), "https://example.com/path");
        assert_eq!(normalize_url("https://example.com"), "https://example.com");
    }
}
