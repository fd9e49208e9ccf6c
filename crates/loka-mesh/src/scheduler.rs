// crates/loka-mesh/src/scheduler.rs

//! Multi-factor node selection
//!
//! Hard filters first (model availability, battery stress for non-interactive
//! work, thermal ceiling, queue depth), then a weighted score. GPU nodes and
//! always-on roles are favoured; busy nodes, deep queues, stressed batteries
//! and warm silicon are penalised. Non-interactive tasks additionally prefer
//! low-wattage nodes.

use crate::registry::NodeRegistry;
use crate::types::{MeshNode, MeshTask, NodeRole, NodeState, TaskPriority};
use log::debug;

const MAX_BATTERY_STRESS: f64 = 70.0;
const MAX_THERMAL_CELSIUS: f64 = 45.0;
const MAX_QUEUE_DEPTH: u32 = 3;

/// Pick the best node for a task, or None when no candidate survives the
/// filters
pub async fn select_node(registry: &NodeRegistry, task: &MeshTask) -> Option<MeshNode> {
    let candidates = registry.with_model(&task.required_model).await;
    let mut best: Option<(f64, MeshNode)> = None;
    for node in candidates {
        if !passes_filters(&node, task.priority) {
            continue;
        }
        let score = score_node(&node, task.priority);
        debug!("node {} scored {:.1} for task {}", node.name, score, task.id);
        let better = match &best {
            Some((best_score, _)) => score > *best_score,
            None => true,
        };
        if better {
            best = Some((score, node));
        }
    }
    best.map(|(_, node)| node)
}

fn passes_filters(node: &MeshNode, priority: TaskPriority) -> bool {
    if priority != TaskPriority::Interactive && node.battery_stress > MAX_BATTERY_STRESS {
        return false;
    }
    if node.thermal_celsius > MAX_THERMAL_CELSIUS {
        return false;
    }
    if node.queue_depth > MAX_QUEUE_DEPTH {
        return false;
    }
    true
}

/// Higher is better
pub fn score_node(node: &MeshNode, priority: TaskPriority) -> f64 {
    let mut score = 0.0;
    if node.capabilities.gpu_accelerated {
        score += 40.0;
    }
    score += node.tokens_per_sec * 0.40;
    if node.role == NodeRole::AlwaysOn {
        score += 20.0;
    }
    if node.state == NodeState::Busy {
        score -= 10.0;
    }
    score -= f64::from(node.queue_depth) * 10.0;
    score -= node.battery_stress * 0.20;
    if node.thermal_celsius > 35.0 {
        score -= 15.0;
    }
    if priority != TaskPriority::Interactive {
        score += (100.0 - node.capabilities.inference_watts) / 100.0 * 20.0;
    }
    score
}
