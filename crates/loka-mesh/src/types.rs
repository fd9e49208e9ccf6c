// crates/loka-mesh/src/types.rs

//! Node and task model for the LAN mesh

use chrono::{DateTime, Utc};
use loka_core::types::Message;
use serde::{Deserialize, Serialize};
use strum::Display;

/// What a machine is for in the mesh
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeRole {
    Orchestrator,
    AlwaysOn,
    Standard,
    Storage,
    Nano,
}

/// Liveness / power state, driven by the sleep state machine
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeState {
    Online,
    Busy,
    LightSleep,
    DeepSleep,
    Waking,
    Unreachable,
}

/// Bucketed temperature band
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ThermalZone {
    Optimal,
    Warm,
    Hot,
    Critical,
}

impl ThermalZone {
    pub fn from_celsius(celsius: f64) -> Self {
        if celsius < 25.0 {
            ThermalZone::Optimal
        } else if celsius < 35.0 {
            ThermalZone::Warm
        } else if celsius < 45.0 {
            ThermalZone::Hot
        } else {
            ThermalZone::Critical
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct NodeCapabilities {
    pub models: Vec<String>,
    pub ram_gb: f64,
    pub gpu_accelerated: bool,
    pub inference_watts: f64,
    pub storage_hub: bool,
}

/// One discovered peer
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MeshNode {
    pub id: String,
    pub name: String,
    pub role: NodeRole,
    pub state: NodeState,
    pub ip: String,
    pub port: u16,
    /// Electricity-market bidding zone, used by region-pinned coop requests
    pub region: Option<String>,
    pub capabilities: NodeCapabilities,
    pub last_seen: DateTime<Utc>,
    pub mac_address: Option<String>,
    pub tokens_per_sec: f64,
    pub queue_depth: u32,
    pub thermal_celsius: f64,
    /// 0-100 summary of state-of-charge, temperature and charging behaviour
    pub battery_stress: f64,
}

impl MeshNode {
    pub fn thermal_zone(&self) -> ThermalZone {
        ThermalZone::from_celsius(self.thermal_celsius)
    }

    /// Family-prefix model match: the tag before `:` matches any variant
    pub fn has_model(&self, tag: &str) -> bool {
        let family = tag.split(':').next().unwrap_or(tag);
        self.capabilities
            .models
            .iter()
            .any(|m| m == tag || m.split(':').next() == Some(family))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskPriority {
    Interactive,
    Batch,
    Ambient,
}

/// A unit of work to be placed on a mesh node
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MeshTask {
    pub id: String,
    pub priority: TaskPriority,
    pub required_model: String,
    pub estimated_tokens: u32,
    pub messages: Vec<Message>,
    pub timeout_secs: u64,
}
