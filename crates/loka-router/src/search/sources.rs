// crates/loka-router/src/search/sources.rs

//! Search source implementations
//!
//! Two sources ship with the gateway: a general web search (Brave, gated on
//! its API key at construction) and an academic paper search (arXiv, keyless
//! but only consulted for research-flavoured queries). A source failure is
//! isolated per fetch task and never cancels the other fetches.

use super::SearchResult;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;

const FETCH_TIMEOUT: Duration = Duration::from_secs(8);

#[async_trait]
pub trait SearchSource: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this source should be consulted for the given query
    fn is_available(&self, query: &str) -> bool;

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>>;
}

pub struct WebSearchSource {
    api_key: String,
    client: reqwest::Client,
}

impl WebSearchSource {
    /// None when `BRAVE_SEARCH_API_KEY` is absent; the engine then omits the
    /// source entirely
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("BRAVE_SEARCH_API_KEY").ok().filter(|k| !k.is_empty())?;
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .ok()?;
        Some(WebSearchSource { api_key, client })
    }
}

#[async_trait]
impl SearchSource for WebSearchSource {
    fn name(&self) -> &str {
        "web"
    }

    fn is_available(&self, _query: &str) -> bool {
        true
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let body: Value = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .query(&[("q", query), ("count", "5")])
            .header("X-Subscription-Token", &self.api_key)
            .send()
            .await?
            .json()
            .await?;

        let results = body["web"]["results"]
            .as_array()
            .ok_or_else(|| anyhow!("unexpected web search response shape"))?
            .iter()
            .filter_map(|entry| {
                Some(SearchResult {
                    title: entry["title"].as_str()?.to_string(),
                    url: entry["url"].as_str()?.to_string(),
                    snippet: entry["description"].as_str().unwrap_or("").to_string(),
                    score: None,
                })
            })
            .collect();
        Ok(results)
    }
}

static ACADEMIC_TOPICS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(paper|papers|study|studies|research|arxiv|algorithm|theorem|dataset|benchmark|survey|peer.reviewed|citation)\b",
    )
    .expect("academic topic regex")
});

pub struct PaperSearchSource {
    client: reqwest::Client,
}

impl PaperSearchSource {
    pub fn new() -> Option<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .ok()?;
        Some(PaperSearchSource { client })
    }

    /// Crude Atom parsing; good enough for title/link/summary triples
    fn parse_feed(feed: &str) -> Vec<SearchResult> {
        let mut results = Vec::new();
        for entry in feed.split("<entry>").skip(1) {
            let title = extract_tag(entry, "title");
            let summary = extract_tag(entry, "summary");
            let url = entry
                .split("<id>")
                .nth(1)
                .and_then(|rest| rest.split("</id>").next())
                .unwrap_or("")
                .trim()
                .to_string();
            if let Some(title) = title {
                if !url.is_empty() {
                    results.push(SearchResult {
                        title,
                        url,
                        snippet: summary.unwrap_or_default(),
                        score: None,
                    });
                }
            }
        }
        results
    }
}

fn extract_tag(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let value = xml.split(&open).nth(1)?.split(&close).next()?;
    let collapsed: String = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

#[async_trait]
impl SearchSource for PaperSearchSource {
    fn name(&self) -> &str {
        "papers"
    }

    fn is_available(&self, query: &str) -> bool {
        ACADEMIC_TOPICS.is_match(query)
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let feed = self
            .client
            .get("http://export.arxiv.org/api/query")
            .query(&[
                ("search_query", format!("all:{}", query).as_str()),
                ("max_results", "5"),
            ])
            .send()
            .await?
            .text()
            .await?;
        Ok(Self::parse_feed(&feed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paper_source_topic_gate() {
        let source = PaperSearchSource::new().unwrap();
        assert!(source.is_available("recent papers on consensus algorithms"));
        assert!(source.is_available("arxiv survey of routing"));
        assert!(!source.is_available("what should I cook tonight"));
    }

    #[test]
    fn test_parse_feed() {
        let feed = r#"<feed><entry>
            <id>http://arxiv.org/abs/2401.00001</id>
            <title>Adaptive   Query Routing</title>
            <summary>We study routing of
            queries.</summary>
        </entry><entry>
            <id>http://arxiv.org/abs/2401.00002</id>
            <title>Second Paper</title>
            <summary>More text.</summary>
        </entry></feed>"#;
        let results = PaperSearchSource::parse_feed(feed);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Adaptive Query Routing");
        assert_eq!(results[0].url, "http://arxiv.org/abs/2401.00001");
        assert_eq!(results[0].snippet, "We study routing of queries.");
    }

    #[test]
    fn test_parse_feed_skips_incomplete_entries() {
        let feed = "<feed><entry><title>No id here</title></entry></feed>";
        assert!(PaperSearchSource::parse_feed(feed).is_empty());
    }
}
