// crates/loka-core/src/error.rs

//! Error taxonomy for the Loka gateway
//!
//! Each variant corresponds to one externally observable failure kind. The
//! gateway maps these onto the OpenAI-compatible error envelope via
//! [`LokaError::status`], [`LokaError::code`] and [`LokaError::error_type`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LokaError {
    /// Invalid config file or missing required environment variable.
    /// Fatal at startup; the gateway must not bind.
    #[error("configuration error: {0}")]
    Config(String),

    /// A provider call failed or timed out
    #[error("provider '{provider}' unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    /// A daily or monthly spend cap would be crossed
    #[error("{period} budget of {limit_eur:.2} EUR exceeded (spent {spent_eur:.2} EUR)")]
    BudgetExceeded {
        period: &'static str,
        limit_eur: f64,
        spent_eur: f64,
    },

    /// Regulated data detected and the configured action is `block`.
    /// Carries the detected type names, never the matched values.
    #[error("request blocked: detected PII types: {}", types.join(", "))]
    PiiBlocked { types: Vec<String> },

    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Raised by the credit ledger before any mutation
    #[error("insufficient credits: balance {balance}, required {required}")]
    InsufficientCredits { balance: i64, required: i64 },

    /// No ready nodes and none in progress; impossible with a correct
    /// planner, so treated as a bug
    #[error("task graph deadlock: {0}")]
    DagDeadlock(String),

    /// Planner emitted a blob that failed schema validation; the router
    /// always recovers from this one
    #[error("plan parse failure: {0}")]
    PlanParse(String),
}

impl LokaError {
    /// HTTP status the gateway surfaces this error with
    pub fn status(&self) -> u16 {
        match self {
            LokaError::Config(_) => 500,
            LokaError::ProviderUnavailable { .. } => 502,
            LokaError::BudgetExceeded { .. } => 402,
            LokaError::PiiBlocked { .. } => 422,
            LokaError::Authentication(_) => 401,
            LokaError::InsufficientCredits { .. } => 402,
            LokaError::DagDeadlock(_) => 500,
            LokaError::PlanParse(_) => 500,
        }
    }

    /// Stable machine-readable code for the error envelope
    pub fn code(&self) -> &'static str {
        match self {
            LokaError::Config(_) => "configuration_error",
            LokaError::ProviderUnavailable { .. } => "provider_unavailable",
            LokaError::BudgetExceeded { .. } => "budget_exceeded",
            LokaError::PiiBlocked { .. } => "pii_detected",
            LokaError::Authentication(_) => "invalid_api_key",
            LokaError::InsufficientCredits { .. } => "insufficient_credits",
            LokaError::DagDeadlock(_) => "internal_error",
            LokaError::PlanParse(_) => "internal_error",
        }
    }

    /// The `type` field of the OpenAI error envelope
    pub fn error_type(&self) -> &'static str {
        match self {
            LokaError::Authentication(_) => "authentication_error",
            LokaError::PiiBlocked { .. } => "invalid_request_error",
            LokaError::BudgetExceeded { .. } | LokaError::InsufficientCredits { .. } => {
                "budget_error"
            }
            LokaError::ProviderUnavailable { .. } => "api_error",
            _ => "server_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = LokaError::Authentication("bad key".to_string());
        assert_eq!(err.status(), 401);
        assert_eq!(err.code(), "invalid_api_key");
        assert_eq!(err.error_type(), "authentication_error");

        let err = LokaError::ProviderUnavailable {
            provider: "ollama".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(err.status(), 502);
    }

    #[test]
    fn test_pii_message_names_types_only() {
        let err = LokaError::PiiBlocked {
            types: vec!["email".to_string(), "iban".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("email"));
        assert!(msg.contains("iban"));
        assert!(!msg.contains('@'));
    }

    #[test]
    fn test_budget_message_carries_period_and_cap() {
        let err = LokaError::BudgetExceeded {
            period: "daily",
            limit_eur: 5.0,
            spent_eur: 5.2,
        };
        let msg = err.to_string();
        assert!(msg.contains("daily"));
        assert!(msg.contains("5.00"));
    }
}
