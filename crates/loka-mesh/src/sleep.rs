// crates/loka-mesh/src/sleep.rs

//! Idle-driven sleep state machine
//!
//! Checks run every 60 seconds. A node idles from `online` into
//! `light_sleep` after the configured idle window, then into `deep_sleep`
//! after twice that window. Observed activity returns any node to `online`
//! and records the timestamp. Waking a deep sleeper requires wake-on-LAN to
//! be enabled and a MAC address on record.

use crate::registry::NodeRegistry;
use crate::types::NodeState;
use crate::wake::send_wake;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const CHECK_INTERVAL_SECS: u64 = 60;

pub struct SleepManager {
    registry: Arc<NodeRegistry>,
    idle_minutes: i64,
    wake_on_lan: bool,
    last_activity: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl SleepManager {
    pub fn new(registry: Arc<NodeRegistry>, idle_minutes: u64, wake_on_lan: bool) -> Self {
        SleepManager {
            registry,
            idle_minutes: idle_minutes as i64,
            wake_on_lan,
            last_activity: RwLock::new(HashMap::new()),
        }
    }

    /// Activity observed on a node: back to online, timestamp recorded
    pub async fn note_activity(&self, node_id: &str) {
        self.last_activity
            .write()
            .await
            .insert(node_id.to_string(), Utc::now());
        self.registry.set_state(node_id, NodeState::Online).await;
    }

    /// Run the periodic check loop until the task is dropped
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(CHECK_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            self.tick_at(Utc::now()).await;
        }
    }

    async fn tick_at(&self, now: DateTime<Utc>) {
        let idle = ChronoDuration::minutes(self.idle_minutes);
        let deep_idle = ChronoDuration::minutes(self.idle_minutes * 2);
        let activity = self.last_activity.read().await;
        for node in self.registry.all().await {
            let last = activity.get(&node.id).copied().unwrap_or(node.last_seen);
            let idle_for = now - last;
            match node.state {
                NodeState::Online if idle_for >= idle => {
                    debug!("node {} idle {}m, entering light sleep", node.name, idle_for.num_minutes());
                    self.registry.set_state(&node.id, NodeState::LightSleep).await;
                }
                NodeState::LightSleep if idle_for >= deep_idle => {
                    debug!("node {} idle {}m, entering deep sleep", node.name, idle_for.num_minutes());
                    self.registry.set_state(&node.id, NodeState::DeepSleep).await;
                }
                _ => {}
            }
        }
    }

    /// Wake a deep sleeper with a magic packet; the node transitions to
    /// `waking` once the broadcast is out
    pub async fn request_wake(&self, node_id: &str) -> Result<()> {
        let node = self
            .registry
            .get(node_id)
            .await
            .ok_or_else(|| anyhow!("unknown node '{}'", node_id))?;
        if node.state != NodeState::DeepSleep {
            return Ok(());
        }
        if !self.wake_on_lan {
            return Err(anyhow!("wake-on-lan is disabled"));
        }
        let mac = node
            .mac_address
            .as_deref()
            .ok_or_else(|| anyhow!("node '{}' has no MAC address on record", node_id))?;
        send_wake(mac).await?;
        self.registry.set_state(node_id, NodeState::Waking).await;
        info!("node {} waking", node.name);
        Ok(())
    }
}
