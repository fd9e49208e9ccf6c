// crates/loka-mesh/src/registry.rs

//! In-memory node table
//!
//! One registry per gateway process, shared by reference. Readers and
//! writers go through an async RwLock so a node record is never observed
//! half-updated. Nodes are evicted to `Unreachable` after three consecutive
//! missed health checks; any successful upsert resets the counter.

use crate::types::{MeshNode, NodeState};
use log::{info, warn};
use std::collections::HashMap;
use tokio::sync::RwLock;

const MAX_MISSES: u32 = 3;

#[derive(Default)]
pub struct NodeRegistry {
    inner: RwLock<HashMap<String, Entry>>,
}

struct Entry {
    node: MeshNode,
    misses: u32,
}

impl NodeRegistry {
    pub fn new() -> Self {
        NodeRegistry::default()
    }

    /// Insert or refresh a node; resets the miss counter
    pub async fn upsert(&self, node: MeshNode) {
        let mut inner = self.inner.write().await;
        let id = node.id.clone();
        match inner.get_mut(&id) {
            Some(entry) => {
                entry.node = node;
                entry.misses = 0;
            }
            None => {
                info!("mesh node discovered: {} ({})", node.name, node.ip);
                inner.insert(id, Entry { node, misses: 0 });
            }
        }
    }

    /// Record one missed health check; the third consecutive miss marks the
    /// node unreachable
    pub async fn record_miss(&self, node_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.get_mut(node_id) {
            entry.misses += 1;
            if entry.misses >= MAX_MISSES && entry.node.state != NodeState::Unreachable {
                warn!(
                    "mesh node {} unreachable after {} missed checks",
                    entry.node.name, entry.misses
                );
                entry.node.state = NodeState::Unreachable;
            }
        }
    }

    pub async fn set_state(&self, node_id: &str, state: NodeState) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.get_mut(node_id) {
            entry.node.state = state;
        }
    }

    pub async fn set_queue_depth(&self, node_id: &str, depth: u32) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.get_mut(node_id) {
            entry.node.queue_depth = depth;
        }
    }

    pub async fn remove(&self, node_id: &str) -> bool {
        self.inner.write().await.remove(node_id).is_some()
    }

    pub async fn get(&self, node_id: &str) -> Option<MeshNode> {
        self.inner.read().await.get(node_id).map(|e| e.node.clone())
    }

    pub async fn all(&self) -> Vec<MeshNode> {
        self.inner.read().await.values().map(|e| e.node.clone()).collect()
    }

    /// Nodes currently able to accept work
    pub async fn available(&self) -> Vec<MeshNode> {
        self.inner
            .read()
            .await
            .values()
            .filter(|e| matches!(e.node.state, NodeState::Online | NodeState::Busy))
            .map(|e| e.node.clone())
            .collect()
    }

    /// Available nodes exposing the model, with family-prefix matching
    pub async fn with_model(&self, tag: &str) -> Vec<MeshNode> {
        self.available()
            .await
            .into_iter()
            .filter(|n| n.has_model(tag))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeCapabilities, NodeRole};
    use chrono::Utc;

    fn node(id: &str, state: NodeState, models: &[&str]) -> MeshNode {
        MeshNode {
            id: id.to_string(),
            name: id.to_string(),
            role: NodeRole::Standard,
            state,
            ip: "192.168.1.30".to_string(),
            port: 11434,
            region: None,
            capabilities: NodeCapabilities {
                models: models.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
            last_seen: Utc::now(),
            mac_address: None,
            tokens_per_sec: 20.0,
            queue_depth: 0,
            thermal_celsius: 22.0,
            battery_stress: 5.0,
        }
    }

    #[tokio::test]
    async fn test_three_misses_mark_unreachable() {
        let registry = NodeRegistry::new();
        registry.upsert(node("n1", NodeState::Online, &[])).await;

        registry.record_miss("n1").await;
        registry.record_miss("n1").await;
        assert_eq!(registry.get("n1").await.unwrap().state, NodeState::Online);

        registry.record_miss("n1").await;
        assert_eq!(registry.get("n1").await.unwrap().state, NodeState::Unreachable);
    }

    #[tokio::test]
    async fn test_upsert_resets_miss_counter() {
        let registry = NodeRegistry::new();
        registry.upsert(node("n1", NodeState::Online, &[])).await;
        registry.record_miss("n1").await;
        registry.record_miss("n1").await;

        // a successful check re-upserts, clearing the two misses
        registry.upsert(node("n1", NodeState::Online, &[])).await;
        registry.record_miss("n1").await;
        registry.record_miss("n1").await;
        assert_eq!(registry.get("n1").await.unwrap().state, NodeState::Online);
    }

    #[tokio::test]
    async fn test_available_excludes_sleepers() {
        let registry = NodeRegistry::new();
        registry.upsert(node("a", NodeState::Online, &[])).await;
        registry.upsert(node("b", NodeState::Busy, &[])).await;
        registry.upsert(node("c", NodeState::DeepSleep, &[])).await;
        registry.upsert(node("d", NodeState::Unreachable, &[])).await;

        let available = registry.available().await;
        let mut ids: Vec<String> = available.into_iter().map(|n| n.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_with_model_family_match() {
        let registry = NodeRegistry::new();
        registry
            .upsert(node("a", NodeState::Online, &["llama3.2:3b-q4"]))
            .await;
        registry
            .upsert(node("b", NodeState::Online, &["qwen2.5:7b"]))
            .await;

        let matches = registry.with_model("llama3.2:1b").await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "a");
    }

    #[tokio::test]
    async fn test_remove_and_queue_depth() {
        let registry = NodeRegistry::new();
        registry.upsert(node("a", NodeState::Online, &[])).await;
        registry.set_queue_depth("a", 4).await;
        assert_eq!(registry.get("a").await.unwrap().queue_depth, 4);
        assert!(registry.remove("a").await);
        assert!(!registry.remove("a").await);
    }
}
