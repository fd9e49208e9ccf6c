// crates/loka-storage/src/credits.rs

//! Append-only credit ledger
//!
//! The `credit_transactions` table is the source of truth; `member_balances`
//! is a derived fast-lookup view updated inside the same sqlite transaction
//! as every append, so a replay of the transaction rows must always
//! reconstruct it. [`CreditLedger::audit`] verifies exactly that.

use anyhow::Result;
use chrono::Utc;
use log::debug;
use loka_core::error::LokaError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use strum::{Display, EnumString};
use tokio_rusqlite::Connection;
use uuid::Uuid;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TxKind {
    Earn,
    Spend,
    Reserve,
    Release,
    GovernanceGrant,
}

/// One appended ledger row, including the balance after applying it
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CreditTransaction {
    pub id: String,
    pub ts: String,
    pub member_id: String,
    pub kind: TxKind,
    /// Signed credit amount; spends and reserves are negative
    pub amount: i64,
    pub tokens: Option<i64>,
    pub task_id: Option<String>,
    pub node_id: Option<String>,
    pub balance_after: i64,
    pub memo: String,
}

/// Outcome of a replay verification pass
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub passed: bool,
    /// Members whose stored balance is negative
    pub negative_balances: Vec<(String, i64)>,
    /// Members whose replayed sum disagrees with the stored balance
    pub divergences: Vec<(String, i64, i64)>,
}

pub struct CreditLedger {
    conn: Connection,
}

impl CreditLedger {
    pub async fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS credit_transactions (
                    id TEXT PRIMARY KEY,
                    ts TEXT NOT NULL,
                    member_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    amount INTEGER NOT NULL,
                    tokens INTEGER,
                    task_id TEXT,
                    node_id TEXT,
                    balance_after INTEGER NOT NULL,
                    memo TEXT NOT NULL
                )
                "#,
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_credit_member_ts ON credit_transactions(member_id, ts)",
                [],
            )?;
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS member_balances (
                    member_id TEXT PRIMARY KEY,
                    balance INTEGER NOT NULL
                )
                "#,
                [],
            )?;
            Ok(())
        })
        .await?;
        Ok(CreditLedger { conn })
    }

    /// Append one transaction and update the derived balance atomically
    ///
    /// A transaction that would push the member's balance below zero fails
    /// with an insufficient-credits error before anything is written.
    pub async fn record(
        &self,
        member_id: &str,
        kind: TxKind,
        amount: i64,
        tokens: Option<i64>,
        task_id: Option<String>,
        node_id: Option<String>,
        memo: &str,
    ) -> Result<CreditTransaction> {
        let member_id = member_id.to_string();
        let memo = memo.to_string();
        let outcome: std::result::Result<CreditTransaction, LokaError> = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let result = apply_transaction(
                    &tx, &member_id, kind, amount, tokens, task_id, node_id, &memo,
                );
                match result {
                    Ok(Ok(record)) => {
                        tx.commit()?;
                        Ok(Ok(record))
                    }
                    Ok(Err(loka)) => Ok(Err(loka)),
                    Err(e) => Err(e.into()),
                }
            })
            .await?;
        let record = outcome?;
        debug!(
            "credit tx {} {} {} -> balance {}",
            record.kind, record.member_id, record.amount, record.balance_after
        );
        Ok(record)
    }

    /// Two records in one atomic sqlite transaction
    pub async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: i64,
        memo: &str,
    ) -> Result<(CreditTransaction, CreditTransaction)> {
        anyhow::ensure!(amount > 0, "transfer amount must be positive");
        let from = from.to_string();
        let to = to.to_string();
        let memo = memo.to_string();
        let outcome: std::result::Result<(CreditTransaction, CreditTransaction), LokaError> = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let debit = match apply_transaction(
                    &tx,
                    &from,
                    TxKind::Spend,
                    -amount,
                    None,
                    None,
                    None,
                    &format!("transfer to {}: {}", to, memo),
                ) {
                    Ok(Ok(record)) => record,
                    Ok(Err(loka)) => return Ok(Err(loka)),
                    Err(e) => return Err(e.into()),
                };
                let credit = match apply_transaction(
                    &tx,
                    &to,
                    TxKind::Earn,
                    amount,
                    None,
                    None,
                    None,
                    &format!("transfer from {}: {}", from, memo),
                ) {
                    Ok(Ok(record)) => record,
                    Ok(Err(loka)) => return Ok(Err(loka)),
                    Err(e) => return Err(e.into()),
                };
                tx.commit()?;
                Ok(Ok((debit, credit)))
            })
            .await?;
        Ok(outcome?)
    }

    pub async fn balance(&self, member_id: &str) -> Result<i64> {
        let member_id = member_id.to_string();
        let balance = self
            .conn
            .call(move |conn| {
                let balance: i64 = conn
                    .query_row(
                        "SELECT balance FROM member_balances WHERE member_id = ?1",
                        [&member_id],
                        |row| row.get(0),
                    )
                    .unwrap_or(0);
                Ok(balance)
            })
            .await?;
        Ok(balance)
    }

    /// Most-recent-first transaction history for one member
    pub async fn history(&self, member_id: &str, limit: usize) -> Result<Vec<CreditTransaction>> {
        let member_id = member_id.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, ts, member_id, kind, amount, tokens, task_id, node_id, balance_after, memo
                     FROM credit_transactions WHERE member_id = ?1
                     ORDER BY ts DESC, rowid DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![member_id, limit as i64], row_to_transaction)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Replay every member's transactions and compare with the derived view
    pub async fn audit(&self) -> Result<AuditReport> {
        let report = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT member_id, COALESCE(SUM(amount), 0) FROM credit_transactions GROUP BY member_id",
                )?;
                let replayed = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                let mut negative_balances = Vec::new();
                let mut divergences = Vec::new();
                for (member, replayed_balance) in replayed {
                    let stored: i64 = conn
                        .query_row(
                            "SELECT balance FROM member_balances WHERE member_id = ?1",
                            [&member],
                            |row| row.get(0),
                        )
                        .unwrap_or(0);
                    if stored < 0 {
                        negative_balances.push((member.clone(), stored));
                    }
                    if stored != replayed_balance {
                        divergences.push((member, stored, replayed_balance));
                    }
                }
                let passed = negative_balances.is_empty() && divergences.is_empty();
                Ok(AuditReport {
                    passed,
                    negative_balances,
                    divergences,
                })
            })
            .await?;
        Ok(report)
    }
}

type ApplyResult = rusqlite::Result<std::result::Result<CreditTransaction, LokaError>>;

#[allow(clippy::too_many_arguments)]
fn apply_transaction(
    tx: &rusqlite::Transaction<'_>,
    member_id: &str,
    kind: TxKind,
    amount: i64,
    tokens: Option<i64>,
    task_id: Option<String>,
    node_id: Option<String>,
    memo: &str,
) -> ApplyResult {
    let current: i64 = tx
        .query_row(
            "SELECT balance FROM member_balances WHERE member_id = ?1",
            [member_id],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let balance_after = current + amount;
    if balance_after < 0 {
        return Ok(Err(LokaError::InsufficientCredits {
            balance: current,
            required: -amount,
        }));
    }

    tx.execute(
        "INSERT INTO member_balances (member_id, balance) VALUES (?1, ?2)
         ON CONFLICT(member_id) DO UPDATE SET balance = ?2",
        rusqlite::params![member_id, balance_after],
    )?;

    let record = CreditTransaction {
        id: Uuid::new_v4().to_string(),
        ts: Utc::now().to_rfc3339(),
        member_id: member_id.to_string(),
        kind,
        amount,
        tokens,
        task_id,
        node_id,
        balance_after,
        memo: memo.to_string(),
    };
    tx.execute(
        "INSERT INTO credit_transactions
         (id, ts, member_id, kind, amount, tokens, task_id, node_id, balance_after, memo)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            record.id,
            record.ts,
            record.member_id,
            record.kind.to_string(),
            record.amount,
            record.tokens,
            record.task_id,
            record.node_id,
            record.balance_after,
            record.memo
        ],
    )?;
    Ok(Ok(record))
}

fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<CreditTransaction> {
    let kind: String = row.get(3)?;
    Ok(CreditTransaction {
        id: row.get(0)?,
        ts: row.get(1)?,
        member_id: row.get(2)?,
        kind: kind.parse().unwrap_or(TxKind::Earn),
        amount: row.get(4)?,
        tokens: row.get(5)?,
        task_id: row.get(6)?,
        node_id: row.get(7)?,
        balance_after: row.get(8)?,
        memo: row.get(9)?,
    })
}
