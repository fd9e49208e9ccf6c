// crates/loka-mesh/src/coop.rs

//! Credit-gated cooperative routing
//!
//! A member's request is costed against a fixed rate table, reserved on the
//! credit ledger before any node is contacted, and released again when no
//! node qualifies. Node choice maximises `tokens_per_sec * 10 -
//! battery_stress` over the filtered candidates.

use crate::registry::NodeRegistry;
use crate::types::MeshNode;
use anyhow::{anyhow, Result};
use log::{debug, info};
use loka_core::error::LokaError;
use loka_storage::credits::{CreditLedger, TxKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Credits per 1k tokens, fixed for the whole cooperative
const CREDITS_PER_1K_INPUT: f64 = 400.0;
const CREDITS_PER_1K_OUTPUT: f64 = 600.0;
const MAX_COOP_BATTERY_STRESS: f64 = 60.0;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CoopRequest {
    pub member_id: String,
    pub task_id: String,
    pub required_model: String,
    pub estimated_input_tokens: u32,
    pub estimated_output_tokens: u32,
    /// Pin execution to nodes in one bidding zone
    pub region: Option<String>,
    pub min_tokens_per_sec: f64,
}

/// A reserved placement: the chosen node plus the credits held for it
#[derive(Debug, Clone)]
pub struct CoopPlacement {
    pub node: MeshNode,
    pub reserved_credits: i64,
    pub reserve_tx_id: String,
}

pub struct CoopRouter {
    ledger: Arc<CreditLedger>,
    registry: Arc<NodeRegistry>,
}

impl CoopRouter {
    pub fn new(ledger: Arc<CreditLedger>, registry: Arc<NodeRegistry>) -> Self {
        CoopRouter { ledger, registry }
    }

    /// Fixed-rate cost estimate in whole credits
    pub fn estimate_credits(request: &CoopRequest) -> i64 {
        let cost = f64::from(request.estimated_input_tokens) / 1000.0 * CREDITS_PER_1K_INPUT
            + f64::from(request.estimated_output_tokens) / 1000.0 * CREDITS_PER_1K_OUTPUT;
        cost.ceil() as i64
    }

    /// Reserve credits and pick a node; releases the reservation when no
    /// node qualifies
    pub async fn route(&self, request: &CoopRequest) -> Result<CoopPlacement> {
        let estimate = Self::estimate_credits(request);
        let balance = self.ledger.balance(&request.member_id).await?;
        if balance < estimate {
            return Err(LokaError::InsufficientCredits {
                balance,
                required: estimate,
            }
            .into());
        }

        let reserve = self
            .ledger
            .record(
                &request.member_id,
                TxKind::Reserve,
                -estimate,
                Some(i64::from(request.estimated_input_tokens + request.estimated_output_tokens)),
                Some(request.task_id.clone()),
                None,
                &format!("reserve for task {}", request.task_id),
            )
            .await?;

        let candidates: Vec<MeshNode> = self
            .registry
            .with_model(&request.required_model)
            .await
            .into_iter()
            .filter(|node| match &request.region {
                Some(region) => node.region.as_deref() == Some(region.as_str()),
                None => true,
            })
            .filter(|node| node.tokens_per_sec >= request.min_tokens_per_sec)
            .filter(|node| node.battery_stress <= MAX_COOP_BATTERY_STRESS)
            .collect();

        if candidates.is_empty() {
            self.ledger
                .record(
                    &request.member_id,
                    TxKind::Release,
                    estimate,
                    None,
                    Some(request.task_id.clone()),
                    None,
                    &format!("release: no nodes for task {}", request.task_id),
                )
                .await?;
            debug!("coop route for {} found no nodes", request.task_id);
            return Err(anyhow!(
                "no mesh nodes satisfy task {} (model {}, region {:?})",
                request.task_id,
                request.required_model,
                request.region
            ));
        }

        let node = candidates
            .into_iter()
            .max_by(|a, b| {
                placement_score(a)
                    .partial_cmp(&placement_score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("candidates is non-empty");

        info!(
            "coop task {} placed on {} ({} credits reserved)",
            request.task_id, node.name, estimate
        );
        Ok(CoopPlacement {
            node,
            reserved_credits: estimate,
            reserve_tx_id: reserve.id,
        })
    }

    /// Settle a finished placement: refund the reservation and spend the
    /// actual cost, crediting the hosting node's member account
    pub async fn settle(
        &self,
        request: &CoopRequest,
        placement: &CoopPlacement,
        actual_tokens: u32,
        host_member: &str,
    ) -> Result<()> {
        let actual = (f64::from(actual_tokens) / 1000.0
            * (CREDITS_PER_1K_INPUT + CREDITS_PER_1K_OUTPUT)
            / 2.0)
            .ceil() as i64;
        self.ledger
            .record(
                &request.member_id,
                TxKind::Release,
                placement.reserved_credits,
                None,
                Some(request.task_id.clone()),
                Some(placement.node.id.clone()),
                "release reservation on settle",
            )
            .await?;
        self.ledger
            .record(
                &request.member_id,
                TxKind::Spend,
                -actual,
                Some(i64::from(actual_tokens)),
                Some(request.task_id.clone()),
                Some(placement.node.id.clone()),
                "settle actual usage",
            )
            .await?;
        self.ledger
            .record(
                host_member,
                TxKind::Earn,
                actual,
                Some(i64::from(actual_tokens)),
                Some(request.task_id.clone()),
                Some(placement.node.id.clone()),
                "hosted cooperative task",
            )
            .await?;
        Ok(())
    }
}

fn placement_score(node: &MeshNode) -> f64 {
    node.tokens_per_sec * 10.0 - node.battery_stress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeCapabilities, NodeRole, NodeState};
    use chrono::Utc;

    fn node(id: &str, tokens_per_sec: f64, battery_stress: f64, region: Option<&str>) -> MeshNode {
        MeshNode {
            id: id.to_string(),
            name: id.to_string(),
            role: NodeRole::Standard,
            state: NodeState::Online,
            ip: "192.168.1.60".to_string(),
            port: 11434,
            region: region.map(String::from),
            capabilities: NodeCapabilities {
                models: vec!["llama3.2:3b".to_string()],
                ..Default::default()
            },
            last_seen: Utc::now(),
            mac_address: None,
            tokens_per_sec,
            queue_depth: 0,
            thermal_celsius: 22.0,
            battery_stress,
        }
    }

    fn request(member: &str) -> CoopRequest {
        CoopRequest {
            member_id: member.to_string(),
            task_id: "task-1".to_string(),
            required_model: "llama3.2".to_string(),
            estimated_input_tokens: 1000,
            estimated_output_tokens: 500,
            region: None,
            min_tokens_per_sec: 0.0,
        }
    }

    async fn seeded_router(credits: i64) -> (CoopRouter, Arc<CreditLedger>, Arc<NodeRegistry>) {
        let ledger = Arc::new(CreditLedger::in_memory().await.unwrap());
        if credits > 0 {
            ledger
                .record("alice", TxKind::GovernanceGrant, credits, None, None, None, "seed")
                .await
                .unwrap();
        }
        let registry = Arc::new(NodeRegistry::new());
        let router = CoopRouter::new(Arc::clone(&ledger), Arc::clone(&registry));
        (router, ledger, registry)
    }

    #[test]
    fn test_estimate_uses_fixed_rates() {
        // 1000 input * 0.4 + 500 output * 0.6 = 700
        assert_eq!(CoopRouter::estimate_credits(&request("alice")), 700);
    }

    #[tokio::test]
    async fn test_rejects_before_reserving_when_balance_low() {
        let (router, ledger, registry) = seeded_router(100).await;
        registry.upsert(node("n1", 30.0, 10.0, None)).await;

        let err = router.route(&request("alice")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LokaError>(),
            Some(LokaError::InsufficientCredits { .. })
        ));
        // no reservation was appended
        assert_eq!(ledger.balance("alice").await.unwrap(), 100);
        assert_eq!(ledger.history("alice", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_nodes_releases_reservation() {
        let (router, ledger, _registry) = seeded_router(1000).await;

        let err = router.route(&request("alice")).await.unwrap_err();
        assert!(err.to_string().contains("no mesh nodes"));

        // reserve then release, net zero
        assert_eq!(ledger.balance("alice").await.unwrap(), 1000);
        let history = ledger.history("alice", 10).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].kind, TxKind::Release);
        assert_eq!(history[1].kind, TxKind::Reserve);
    }

    #[tokio::test]
    async fn test_picks_fast_low_stress_node() {
        let (router, _ledger, registry) = seeded_router(1000).await;
        registry.upsert(node("slow", 10.0, 0.0, None)).await;
        registry.upsert(node("fast", 50.0, 30.0, None)).await;
        registry.upsert(node("stressed", 90.0, 65.0, None)).await; // over coop cap

        let placement = router.route(&request("alice")).await.unwrap();
        assert_eq!(placement.node.id, "fast");
        assert_eq!(placement.reserved_credits, 700);
    }

    #[tokio::test]
    async fn test_region_pinning() {
        let (router, _ledger, registry) = seeded_router(1000).await;
        registry.upsert(node("nl", 30.0, 10.0, Some("NL"))).await;
        registry.upsert(node("de", 80.0, 10.0, Some("DE"))).await;

        let mut req = request("alice");
        req.region = Some("NL".to_string());
        let placement = router.route(&req).await.unwrap();
        assert_eq!(placement.node.id, "nl");
    }

    #[tokio::test]
    async fn test_settle_round_trip_keeps_audit_clean() {
        let (router, ledger, registry) = seeded_router(1000).await;
        registry.upsert(node("n1", 30.0, 10.0, None)).await;

        let req = request("alice");
        let placement = router.route(&req).await.unwrap();
        router.settle(&req, &placement, 800, "bob").await.unwrap();

        // alice paid for actual usage, bob earned it, reservation refunded
        let audit = ledger.audit().await.unwrap();
        assert!(audit.passed);
        let actual = (800.0 / 1000.0 * 500.0_f64).ceil() as i64;
        assert_eq!(ledger.balance("alice").await.unwrap(), 1000 - actual);
        assert_eq!(ledger.balance("bob").await.unwrap(), actual);
    }
}
