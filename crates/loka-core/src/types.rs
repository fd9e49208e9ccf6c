// crates/loka-core/src/types.rs

//! Core types for the Loka routing system
//!
//! This module defines the data structures exchanged between the gateway,
//! the router and the provider adapters: chat messages, completion results
//! and the routing decision that wraps every answered request.

use serde::{Deserialize, Serialize};
use strum::Display;

/// The speaker of a chat message
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message
///
/// An ordered sequence of messages forms a conversation. The gateway accepts
/// these in the OpenAI wire shape and passes them through the router
/// unchanged apart from synthetic system messages prepended by memory recall
/// and search augmentation.
///
/// # Examples
///
/// ```rust
/// use loka_core::types::{Message, Role};
///
/// let msg = Message {
///     role: Role::User,
///     content: "What is 2 + 2?".to_string(),
/// };
/// ```
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-request completion options forwarded to the chosen provider
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CompletionOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Provider-call timeout in seconds
    pub timeout_secs: u64,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        CompletionOptions {
            temperature: None,
            max_tokens: None,
            timeout_secs: 60,
        }
    }
}

/// The result of one provider completion
///
/// Token counts may be provider-estimated; `cost_eur` is zero for local
/// executions.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CompletionResult {
    /// The generated content
    pub content: String,
    /// The model that produced the content
    pub model: String,
    /// Tokens consumed by the prompt
    pub prompt_tokens: u32,
    /// Tokens produced in the completion
    pub completion_tokens: u32,
    /// Monetary cost in EUR
    pub cost_eur: f64,
    /// Wall-clock latency in milliseconds
    pub latency_ms: u64,
}

/// Where a request executed
///
/// `Delegated` is the post-hoc label for specialist requests that expanded
/// into a subtask plan.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RoutingTier {
    Local,
    Specialist,
    Cloud,
    Delegated,
}

/// Why the router chose the tier it chose
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RoutingReason {
    PiiDetected,
    TokenLimit,
    LowComplexity,
    MediumComplexity,
    HighComplexity,
    BudgetExceeded,
    ProviderUnavailable,
    SearchAugmented,
}

/// The router's verdict for one request, immutable after construction
#[derive(Debug, Serialize, Clone)]
pub struct RoutingDecision {
    pub tier: RoutingTier,
    pub model: String,
    pub reason: RoutingReason,
    /// Complexity score in [0, 1]
    pub complexity: f64,
    pub response: CompletionResult,
}

/// Rough token estimate used by the token gate and the budget pre-check
///
/// The heuristic is `round(word_count * 1.3)`; providers report exact counts
/// after execution.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.split_whitespace().count() as f64 * 1.3).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one two three four"), 5); // 4 * 1.3 = 5.2 -> 5
        assert_eq!(estimate_tokens("hello"), 1);
    }

    #[test]
    fn test_role_serde_lowercase() {
        let msg = Message::user("hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"user\""));

        let back: Message = serde_json::from_str(r#"{"role":"assistant","content":"ok"}"#).unwrap();
        assert_eq!(back.role, Role::Assistant);
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(RoutingTier::Local.to_string(), "local");
        assert_eq!(RoutingTier::Delegated.to_string(), "delegated");
        assert_eq!(RoutingReason::PiiDetected.to_string(), "pii_detected");
    }
}
