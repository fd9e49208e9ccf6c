// crates/loka-mesh/src/discovery.rs

//! LAN peer discovery
//!
//! Every node broadcasts a small JSON beacon over UDP at a fixed cadence and
//! listens for the beacons of others. A received beacon upserts the sender
//! into the registry (which also clears its miss counter); nodes that go
//! quiet accumulate misses through the health loop until the registry marks
//! them unreachable.

use crate::registry::NodeRegistry;
use crate::types::{MeshNode, NodeState};
use anyhow::Result;
use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

pub const DISCOVERY_PORT: u16 = 47411;
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(30);
const MISS_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Beacons older than this count as a missed check on the sweep
const STALE_AFTER_SECS: i64 = 90;

/// The wire form of one announcement
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Beacon {
    pub node: MeshNode,
}

impl Beacon {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Beacon> {
        Ok(serde_json::from_slice(payload)?)
    }
}

pub struct Discovery {
    registry: Arc<NodeRegistry>,
    local_node_id: String,
}

impl Discovery {
    pub fn new(registry: Arc<NodeRegistry>, local_node_id: &str) -> Self {
        Discovery {
            registry,
            local_node_id: local_node_id.to_string(),
        }
    }

    /// Broadcast this node's beacon on a fixed cadence
    pub async fn announce(self: Arc<Self>, mut node: MeshNode) -> Result<()> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;
        let mut ticker = tokio::time::interval(ANNOUNCE_INTERVAL);
        loop {
            ticker.tick().await;
            node.last_seen = Utc::now();
            let beacon = Beacon { node: node.clone() };
            match beacon.encode() {
                Ok(payload) => {
                    if let Err(e) = socket
                        .send_to(&payload, ("255.255.255.255", DISCOVERY_PORT))
                        .await
                    {
                        warn!("beacon broadcast failed: {}", e);
                    }
                }
                Err(e) => warn!("beacon encode failed: {}", e),
            }
        }
    }

    /// Listen for peer beacons and feed them into the registry
    pub async fn listen(self: Arc<Self>) -> Result<()> {
        let socket = UdpSocket::bind(("0.0.0.0", DISCOVERY_PORT)).await?;
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let (len, from) = socket.recv_from(&mut buffer).await?;
            match Beacon::decode(&buffer[..len]) {
                Ok(beacon) => {
                    if beacon.node.id == self.local_node_id {
                        continue;
                    }
                    debug!("beacon from {} ({})", beacon.node.name, from);
                    self.accept(beacon.node).await;
                }
                Err(e) => debug!("ignoring malformed beacon from {}: {}", from, e),
            }
        }
    }

    /// A fresh beacon always lands the node in an awake state
    pub async fn accept(&self, mut node: MeshNode) {
        if matches!(node.state, NodeState::Unreachable | NodeState::Waking) {
            node.state = NodeState::Online;
        }
        node.last_seen = Utc::now();
        self.registry.upsert(node).await;
    }

    /// Periodic staleness sweep: silent nodes accumulate misses until the
    /// registry marks them unreachable
    pub async fn sweep(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(MISS_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            self.sweep_once(Utc::now()).await;
        }
    }

    async fn sweep_once(&self, now: chrono::DateTime<Utc>) {
        for node in self.registry.all().await {
            if node.id == self.local_node_id {
                continue;
            }
            let silent_for = (now - node.last_seen).num_seconds();
            if silent_for > STALE_AFTER_SECS {
                self.registry.record_miss(&node.id).await;
            }
        }
    }
}
