// crates/loka-router/src/recall.rs

//! Conversation-memory recall
//!
//! Before routing, the working set of the configured session is pulled from
//! the memory store, vectorised with TF-IDF (lowercase alphanumeric tokens
//! of three or more characters, stopwords removed, L2-normalised), and the
//! best matches for the incoming query are folded into one synthetic system
//! message, ordered chronologically. Recall failure is never fatal to the
//! request.

use anyhow::Result;
use log::debug;
use loka_core::types::{Message, Role};
use loka_storage::memory::{MemoryEntry, MemoryStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// How much of the session tail participates in TF-IDF scoring
const WORKING_SET_SIZE: usize = 64;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her", "was", "one",
    "our", "out", "day", "get", "has", "him", "his", "how", "man", "new", "now", "old", "see",
    "two", "way", "who", "did", "its", "let", "she", "too", "use", "that", "with", "have", "this",
    "will", "your", "from", "they", "know", "want", "been", "good", "much", "some", "time", "what",
    "about", "which", "their", "would", "there", "could", "other",
];

pub struct MemoryRecall {
    store: Arc<MemoryStore>,
    session_id: String,
    top_k: usize,
}

impl MemoryRecall {
    pub fn new(store: Arc<MemoryStore>, session_id: &str, top_k: usize) -> Self {
        MemoryRecall {
            store,
            session_id: session_id.to_string(),
            top_k,
        }
    }

    /// Retrieve the top-k related entries as one synthetic system message
    pub async fn recall(&self, query: &str) -> Result<Option<Message>> {
        let entries = self.store.recent(&self.session_id, WORKING_SET_SIZE).await?;
        if entries.is_empty() {
            return Ok(None);
        }

        let ranked = rank_by_tfidf(query, &entries, self.top_k);
        if ranked.is_empty() {
            return Ok(None);
        }

        let mut lines = vec!["Relevant conversation history:".to_string()];
        for entry in &ranked {
            let role = match entry.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
            };
            lines.push(format!("- [{}] {}", role, entry.content));
        }
        debug!("memory recall surfaced {} entries", ranked.len());
        Ok(Some(Message::system(lines.join("\n"))))
    }

    /// Persist one exchange so later requests can recall it
    pub async fn remember(&self, user: &str, assistant: &str) -> Result<()> {
        self.store.add(&self.session_id, Role::User, user, None).await?;
        self.store
            .add(&self.session_id, Role::Assistant, assistant, None)
            .await?;
        Ok(())
    }
}

/// Top-k entries by cosine similarity in TF-IDF space, returned in their
/// original chronological order
fn rank_by_tfidf<'a>(query: &str, entries: &'a [MemoryEntry], top_k: usize) -> Vec<&'a MemoryEntry> {
    let documents: Vec<Vec<String>> = entries.iter().map(|e| tokenize(&e.content)).collect();
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return Vec::new();
    }

    let idf = inverse_document_frequencies(&documents, &query_tokens);
    let query_vector = tfidf_vector(&query_tokens, &idf);

    let mut scored: Vec<(usize, f64)> = documents
        .iter()
        .enumerate()
        .map(|(i, tokens)| (i, cosine(&query_vector, &tfidf_vector(tokens, &idf))))
        .filter(|(_, score)| *score > 0.0)
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);

    let mut indices: Vec<usize> = scored.into_iter().map(|(i, _)| i).collect();
    indices.sort_unstable();
    indices.into_iter().map(|i| &entries[i]).collect()
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .filter(|t| !STOPWORDS.contains(t))
        .map(String::from)
        .collect()
}

fn inverse_document_frequencies(
    documents: &[Vec<String>],
    query_tokens: &[String],
) -> HashMap<String, f64> {
    let n = documents.len() as f64 + 1.0;
    let mut vocabulary: HashSet<&String> = query_tokens.iter().collect();
    for doc in documents {
        vocabulary.extend(doc.iter());
    }
    vocabulary
        .into_iter()
        .map(|term| {
            let containing = documents.iter().filter(|d| d.contains(term)).count() as f64;
            (term.clone(), (n / (containing + 1.0)).ln() + 1.0)
        })
        .collect()
}

/// L2-normalised TF-IDF weights
fn tfidf_vector(tokens: &[String], idf: &HashMap<String, f64>) -> HashMap<String, f64> {
    if tokens.is_empty() {
        return HashMap::new();
    }
    let mut counts: HashMap<&String, f64> = HashMap::new();
    for token in tokens {
        *counts.entry(token).or_insert(0.0) += 1.0;
    }
    let total = tokens.len() as f64;
    let mut vector: HashMap<String, f64> = counts
        .into_iter()
        .map(|(term, count)| {
            let weight = (count / total) * idf.get(term).copied().unwrap_or(1.0);
            (term.clone(), weight)
        })
        .collect();
    let norm: f64 = vector.values().map(|w| w * w).sum::<f64>().sqrt();
    if norm > 0.0 {
        for weight in vector.values_mut() {
            *weight /= norm;
        }
    }
    vector
}

fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    a.iter()
        .filter_map(|(term, weight)| b.get(term).map(|other| weight * other))
        .sum()
}
