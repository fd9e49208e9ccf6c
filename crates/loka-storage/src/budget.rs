// crates/loka-storage/src/budget.rs

//! Budget ledger backed by sqlite
//!
//! The `costs` table is append-only and carries metadata only: model name,
//! token counts, EUR cost and tier. Query content is never written here.
//! Cap enforcement and the append happen inside a single connection call so
//! concurrent writers cannot interleave between the read and the write.

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use loka_core::config::BudgetLimits;
use loka_core::error::LokaError;
use loka_core::types::{RoutingReason, RoutingTier};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_rusqlite::Connection;

/// One persisted spend record; immutable once written
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CostRecord {
    pub ts: DateTime<Utc>,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost_eur: f64,
    pub tier: RoutingTier,
}

impl CostRecord {
    pub fn new(model: impl Into<String>, prompt: u32, completion: u32, cost_eur: f64, tier: RoutingTier) -> Self {
        CostRecord {
            ts: Utc::now(),
            model: model.into(),
            prompt_tokens: prompt,
            completion_tokens: completion,
            cost_eur,
            tier,
        }
    }
}

/// Totals returned by [`BudgetLedger::summary`]
#[derive(Debug, Clone, Serialize)]
pub struct BudgetSummary {
    pub today_eur: f64,
    pub month_eur: f64,
    pub lifetime_eur: f64,
    pub query_count: u64,
    pub local_query_count: u64,
}

pub struct BudgetLedger {
    conn: Connection,
    limits: BudgetLimits,
}

impl BudgetLedger {
    pub async fn new(path: &Path, limits: BudgetLimits) -> Result<Self> {
        let conn = Connection::open(path).await?;
        Self::init(conn, limits).await
    }

    pub async fn in_memory(limits: BudgetLimits) -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn, limits).await
    }

    async fn init(conn: Connection, limits: BudgetLimits) -> Result<Self> {
        conn.call(|conn| {
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS costs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ts TEXT NOT NULL,
                    model TEXT NOT NULL,
                    prompt_tokens INTEGER NOT NULL,
                    completion_tokens INTEGER NOT NULL,
                    cost_eur REAL NOT NULL,
                    tier TEXT NOT NULL
                )
                "#,
                [],
            )?;
            conn.execute("CREATE INDEX IF NOT EXISTS idx_costs_ts ON costs(ts)", [])?;
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS query_log (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ts TEXT NOT NULL,
                    tier TEXT NOT NULL,
                    reason TEXT NOT NULL,
                    model TEXT NOT NULL,
                    complexity REAL NOT NULL
                )
                "#,
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(BudgetLedger { conn, limits })
    }

    /// Enforce the daily and monthly caps, then append
    ///
    /// When either cap would be crossed the record is not written and a
    /// budget-exceeded error is raised; on success a console warning fires
    /// once daily usage crosses the warn-at percentage.
    pub async fn check_and_record(&self, record: &CostRecord) -> Result<()> {
        let record = record.clone();
        let limits = self.limits;
        let outcome: std::result::Result<f64, LokaError> = self
            .conn
            .call(move |conn| {
                let day = record.ts.format("%Y-%m-%d").to_string();
                let month = record.ts.format("%Y-%m").to_string();
                let today: f64 = conn.query_row(
                    "SELECT COALESCE(SUM(cost_eur), 0.0) FROM costs WHERE ts LIKE ?1 || '%'",
                    [&day],
                    |row| row.get(0),
                )?;
                let monthly: f64 = conn.query_row(
                    "SELECT COALESCE(SUM(cost_eur), 0.0) FROM costs WHERE ts LIKE ?1 || '%'",
                    [&month],
                    |row| row.get(0),
                )?;

                if today + record.cost_eur > limits.daily_eur {
                    return Ok(Err(LokaError::BudgetExceeded {
                        period: "daily",
                        limit_eur: limits.daily_eur,
                        spent_eur: today,
                    }));
                }
                if monthly + record.cost_eur > limits.monthly_eur {
                    return Ok(Err(LokaError::BudgetExceeded {
                        period: "monthly",
                        limit_eur: limits.monthly_eur,
                        spent_eur: monthly,
                    }));
                }

                insert_cost(conn, &record)?;
                Ok(Ok(today + record.cost_eur))
            })
            .await?;

        let today_after = outcome?;
        let warn_at = limits.daily_eur * f64::from(self.limits.warn_at_percent) / 100.0;
        if today_after >= warn_at {
            warn!(
                "budget warning: {:.4} EUR of {:.2} EUR daily limit used",
                today_after, limits.daily_eur
            );
        }
        Ok(())
    }

    /// Unconditional append, used for zero-cost local executions so query
    /// counts stay accurate
    pub async fn record(&self, record: &CostRecord) -> Result<()> {
        let row = record.clone();
        self.conn
            .call(move |conn| {
                insert_cost(conn, &row)?;
                Ok(())
            })
            .await?;
        debug!("recorded {} cost row ({})", record.tier, record.model);
        Ok(())
    }

    /// Metadata-only trace of a completed routing decision
    pub async fn record_query(
        &self,
        tier: RoutingTier,
        reason: RoutingReason,
        model: &str,
        complexity: f64,
    ) -> Result<()> {
        let model = model.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO query_log (ts, tier, reason, model, complexity) VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        Utc::now().to_rfc3339(),
                        tier.to_string(),
                        reason.to_string(),
                        model,
                        complexity
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn summary(&self) -> Result<BudgetSummary> {
        let summary = self
            .conn
            .call(|conn| {
                let now = Utc::now();
                let day = now.format("%Y-%m-%d").to_string();
                let month = now.format("%Y-%m").to_string();
                let today_eur: f64 = conn.query_row(
                    "SELECT COALESCE(SUM(cost_eur), 0.0) FROM costs WHERE ts LIKE ?1 || '%'",
                    [&day],
                    |row| row.get(0),
                )?;
                let month_eur: f64 = conn.query_row(
                    "SELECT COALESCE(SUM(cost_eur), 0.0) FROM costs WHERE ts LIKE ?1 || '%'",
                    [&month],
                    |row| row.get(0),
                )?;
                let lifetime_eur: f64 = conn.query_row(
                    "SELECT COALESCE(SUM(cost_eur), 0.0) FROM costs",
                    [],
                    |row| row.get(0),
                )?;
                let query_count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM costs", [], |row| row.get(0))?;
                let local_query_count: u64 = conn.query_row(
                    "SELECT COUNT(*) FROM costs WHERE tier = 'local'",
                    [],
                    |row| row.get(0),
                )?;
                Ok(BudgetSummary {
                    today_eur,
                    month_eur,
                    lifetime_eur,
                    query_count,
                    local_query_count,
                })
            })
            .await?;
        Ok(summary)
    }

    pub fn limits(&self) -> BudgetLimits {
        self.limits
    }
}

fn insert_cost(conn: &rusqlite::Connection, record: &CostRecord) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO costs (ts, model, prompt_tokens, completion_tokens, cost_eur, tier)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            record.ts.to_rfc3339(),
            record.model,
            record.prompt_tokens,
            record.completion_tokens,
            record.cost_eur,
            record.tier.to_string()
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(daily: f64, monthly: f64) -> BudgetLimits {
        BudgetLimits {
            daily_eur: daily,
            monthly_eur: monthly,
            warn_at_percent: 80,
        }
    }

    #[tokio::test]
    async fn test_check_and_record_under_cap() {
        let ledger = BudgetLedger::in_memory(limits(5.0, 60.0)).await.unwrap();
        let record = CostRecord::new("claude-sonnet", 100, 50, 0.01, RoutingTier::Cloud);
        ledger.check_and_record(&record).await.unwrap();

        let summary = ledger.summary().await.unwrap();
        assert!((summary.today_eur - 0.01).abs() < 1e-9);
        assert_eq!(summary.query_count, 1);
    }

    #[tokio::test]
    async fn test_daily_cap_rejects_without_writing() {
        let ledger = BudgetLedger::in_memory(limits(0.05, 60.0)).await.unwrap();
        let ok = CostRecord::new("m", 10, 10, 0.04, RoutingTier::Cloud);
        ledger.check_and_record(&ok).await.unwrap();

        let too_much = CostRecord::new("m", 10, 10, 0.02, RoutingTier::Cloud);
        let err = ledger.check_and_record(&too_much).await.unwrap_err();
        let loka = err.downcast_ref::<LokaError>().unwrap();
        assert!(matches!(loka, LokaError::BudgetExceeded { period: "daily", .. }));

        // the rejected record must not appear in the totals
        let summary = ledger.summary().await.unwrap();
        assert!((summary.today_eur - 0.04).abs() < 1e-9);
        assert_eq!(summary.query_count, 1);
    }

    #[tokio::test]
    async fn test_monthly_cap_applies_too() {
        let ledger = BudgetLedger::in_memory(limits(10.0, 0.03)).await.unwrap();
        let record = CostRecord::new("m", 10, 10, 0.04, RoutingTier::Cloud);
        let err = ledger.check_and_record(&record).await.unwrap_err();
        let loka = err.downcast_ref::<LokaError>().unwrap();
        assert!(matches!(loka, LokaError::BudgetExceeded { period: "monthly", .. }));
    }

    #[tokio::test]
    async fn test_successful_sequence_never_exceeds_cap() {
        let ledger = BudgetLedger::in_memory(limits(0.10, 60.0)).await.unwrap();
        let mut accepted = 0.0;
        for _ in 0..20 {
            let record = CostRecord::new("m", 5, 5, 0.015, RoutingTier::Cloud);
            if ledger.check_and_record(&record).await.is_ok() {
                accepted += 0.015;
            }
        }
        assert!(accepted <= 0.10 + 1e-9);
        let summary = ledger.summary().await.unwrap();
        assert!(summary.today_eur <= 0.10 + 1e-9);
    }

    #[tokio::test]
    async fn test_record_is_unconditional_and_zero_cost() {
        let ledger = BudgetLedger::in_memory(limits(0.0, 0.0)).await.unwrap();
        let record = CostRecord::new("llama3.2:3b", 20, 40, 0.0, RoutingTier::Local);
        ledger.record(&record).await.unwrap();

        let summary = ledger.summary().await.unwrap();
        assert_eq!(summary.query_count, 1);
        assert_eq!(summary.local_query_count, 1);
        assert_eq!(summary.lifetime_eur, 0.0);
    }

    #[tokio::test]
    async fn test_query_log_append() {
        let ledger = BudgetLedger::in_memory(limits(5.0, 60.0)).await.unwrap();
        ledger
            .record_query(RoutingTier::Local, RoutingReason::LowComplexity, "llama3.2:3b", 0.12)
            .await
            .unwrap();
    }
}
