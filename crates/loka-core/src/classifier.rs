// crates/loka-core/src/classifier.rs

//! Lexical complexity classifier
//!
//! A pure function from query text to a score in [0, 1] and a routing tier.
//! Six weighted signals are combined: estimated token count, reasoning and
//! comparison vocabulary, technical density (code, traces, paths), reasoning
//! connectives, chain-of-thought markers, and a sentence-count length bonus.
//! Total on all strings: empty input, pure punctuation and megabyte pastes
//! all yield a valid score.

use crate::types::{estimate_tokens, RoutingTier};
use once_cell::sync::Lazy;
use regex::Regex;

const WEIGHT_TOKENS: f64 = 0.15;
const WEIGHT_QUESTION: f64 = 0.25;
const WEIGHT_TECHNICAL: f64 = 0.20;
const WEIGHT_REASONING: f64 = 0.20;
const WEIGHT_COT: f64 = 0.10;
const WEIGHT_LENGTH: f64 = 0.10;

/// Reasoning and comparison terms that push a query above the local tier
static QUESTION_TERMS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(how|why|compare|contrast|analy[sz]e|versus|vs|explain|evaluate|trade-?offs?|architecture|architectures|distributed|scalab\w+|performance|concurren\w+|optimi[sz]e\w*|design|implement\w*|difference|implications?)\b",
    )
    .expect("question term regex")
});

static REASONING_TERMS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(because|therefore|however|consequently|thus|hence|moreover|furthermore|implication|implications|rationale|justif\w+|reasoning|assumption|assumptions)\b",
    )
    .expect("reasoning term regex")
});

static COT_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(step[- ]by[- ]step|\bfirst\b|\bsecond\b|\bthird\b|\bfinally\b|in conclusion|let'?s think|break (it |this )?down|\boutline\b)",
    )
    .expect("cot marker regex")
});

static TECHNICAL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // fenced code block
        Regex::new(r"```").expect("code fence regex"),
        // inline code
        Regex::new(r"`[^`\n]+`").expect("inline code regex"),
        // stack trace frames and panics
        Regex::new(r"(?m)(^\s+at\s+\S+|Traceback \(most recent call last\)|panicked at)")
            .expect("stack trace regex"),
        // dotted identifier path like http.server.Request
        Regex::new(r"\b\w+\.\w+\.\w+\b").expect("dotted path regex"),
        // source file path
        Regex::new(r"\b[\w./\\-]+\.(rs|ts|tsx|js|jsx|py|go|java|c|h|cpp|rb|json|ya?ml|toml)\b")
            .expect("file path regex"),
        // error keywords
        Regex::new(r"(?i)\b(error|exception|panic|failed|failure|traceback|typeerror|undefined|segfault|stack overflow)\b")
            .expect("error keyword regex"),
    ]
});

/// A complexity score with its mapped tier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub score: f64,
    pub tier: RoutingTier,
}

/// Score a query and map it onto a tier
///
/// `local_threshold` and `cloud_threshold` come from the router config;
/// scores below the first stay local, below the second go to the
/// specialist, everything else goes to the cloud.
pub fn classify(text: &str, local_threshold: f64, cloud_threshold: f64) -> Classification {
    let score = score(text);
    let tier = if score < local_threshold {
        RoutingTier::Local
    } else if score < cloud_threshold {
        RoutingTier::Specialist
    } else {
        RoutingTier::Cloud
    };
    Classification { score, tier }
}

/// The weighted-sum score on its own, clamped to [0, 1]
pub fn score(text: &str) -> f64 {
    let tokens = estimate_tokens(text) as f64;
    let token_signal = clamp01((tokens + 1.0).ln() / 8001f64.ln());

    let question_signal = clamp01(QUESTION_TERMS.find_iter(text).count() as f64 / 4.0);

    let technical_matches: usize = TECHNICAL_PATTERNS
        .iter()
        .map(|p| p.find_iter(text).count())
        .sum();
    let technical_signal = clamp01(technical_matches as f64 / 5.0);

    let reasoning_signal = clamp01(REASONING_TERMS.find_iter(text).count() as f64 / 4.0);

    let cot_signal = clamp01(COT_MARKERS.find_iter(text).count() as f64 / 2.0);

    let sentences = sentence_count(text) as f64;
    let length_signal = clamp01((sentences - 1.0).max(0.0) / 10.0);

    clamp01(
        token_signal * WEIGHT_TOKENS
            + question_signal * WEIGHT_QUESTION
            + technical_signal * WEIGHT_TECHNICAL
            + reasoning_signal * WEIGHT_REASONING
            + cot_signal * WEIGHT_COT
            + length_signal * WEIGHT_LENGTH,
    )
}

fn sentence_count(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
}

fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: f64 = 0.35;
    const CLOUD: f64 = 0.65;

    #[test]
    fn test_trivial_question_is_local() {
        let c = classify("What is 2 + 2?", LOCAL, CLOUD);
        assert!(c.score < 0.35, "score was {}", c.score);
        assert_eq!(c.tier, RoutingTier::Local);
    }

    #[test]
    fn test_empty_string_is_total() {
        let c = classify("", LOCAL, CLOUD);
        assert!((0.0..=1.0).contains(&c.score));
        assert_eq!(c.tier, RoutingTier::Local);
    }

    #[test]
    fn test_pure_punctuation_is_total() {
        let c = classify("?!?!... ---", LOCAL, CLOUD);
        assert!((0.0..=1.0).contains(&c.score));
    }

    #[test]
    fn test_very_long_string_stays_in_range() {
        let text = "word ".repeat(50_000);
        let s = score(&text);
        assert!((0.0..=1.0).contains(&s));
    }

    #[test]
    fn test_dense_technical_prompt_is_cloud() {
        // three sentences, heavy comparison vocabulary, a fenced trace
        let text = "Compare the trade-off between a distributed architecture and a \
                    monolith, and explain why performance differs under load. \
                    Analyse the implications step by step, because we must evaluate \
                    how each design scales; therefore outline the rationale. \
                    First, consider this error from `api.service.ts`:\n\
                    ```\nTypeError: cannot read dispatch of undefined\n    at Router.handle (src/router.ts:42:7)\n```";
        let c = classify(text, LOCAL, CLOUD);
        assert!(c.score > 0.65, "score was {}", c.score);
        assert_eq!(c.tier, RoutingTier::Cloud);
    }

    #[test]
    fn test_medium_prompt_is_specialist() {
        let text = "Explain why a distributed cache would improve performance here, \
                    because the workload is read-heavy. However, compare the main \
                    trade-offs against a local cache and analyse which architecture fits.";
        let c = classify(text, LOCAL, CLOUD);
        assert!(c.score >= 0.35 && c.score < 0.65, "score was {}", c.score);
        assert_eq!(c.tier, RoutingTier::Specialist);
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let c = classify("What is 2 + 2?", 0.0, 1.0);
        assert_eq!(c.tier, RoutingTier::Specialist);
    }
}
