//! Request routing for the Loka gateway
//!
//! Everything between the HTTP surface and the provider adapters lives
//! here: the decision pipeline itself, the delegation engine with its task
//! graphs, web-search augmentation, conversation-memory recall and the
//! best-effort routing trace log.

pub mod dag;
pub mod delegation;
pub mod recall;
pub mod router;
pub mod search;
pub mod trace;

#[cfg(test)]
pub(crate) mod testing;

pub use router::{RouteExplanation, Router, StreamDecision};

/// Remove one optional layer of markdown fencing from model output
///
/// Planner and expansion prompts forbid fences, but small local models add
/// them anyway often enough that every JSON parse goes through this first.
pub(crate) fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }
}
