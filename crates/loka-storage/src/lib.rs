//! Embedded persistence for the Loka gateway
//!
//! Three independent sqlite databases, one per concern: the budget ledger
//! (spend caps and the query log), the session memory store, and the
//! append-only credit ledger. Schemas are versioned with
//! `CREATE TABLE IF NOT EXISTS`; every handle is constructed once at startup
//! and shared by reference.

pub mod budget;
pub mod credits;
pub mod memory;

pub use budget::{BudgetLedger, BudgetSummary, CostRecord};
pub use credits::{AuditReport, CreditLedger, CreditTransaction, TxKind};
pub use memory::{MemoryEntry, MemoryStore};
