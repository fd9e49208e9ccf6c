// crates/loka-router/src/dag.rs

//! Task graphs and the readiness-driven executor
//!
//! A plan is a set of nodes with dependency edges. Validation guarantees the
//! invariants the executor relies on: unique ids, every referenced
//! dependency exists, no cycles, at least one root. Execution is a loop:
//! pick every node whose dependencies have completed, run the batch
//! concurrently, await it, repeat. "No ready nodes and nothing running"
//! is a deadlock and surfaces as an internal error.

use anyhow::Result;
use loka_core::error::LokaError;
use loka_core::types::{CompletionResult, RoutingTier};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TaskNode {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub complexity: f64,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub tier: Option<RoutingTier>,
    pub token_budget: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct TaskGraph {
    pub plan_id: String,
    pub original_query: String,
    pub nodes: Vec<TaskNode>,
    pub critical_path_len: usize,
}

impl TaskGraph {
    /// Validate the invariants and compute the critical-path length
    pub fn new(plan_id: &str, original_query: &str, nodes: Vec<TaskNode>) -> Result<Self> {
        let mut ids = HashSet::new();
        for node in &nodes {
            if !ids.insert(node.id.clone()) {
                return Err(LokaError::PlanParse(format!("duplicate task id '{}'", node.id)).into());
            }
        }
        for node in &nodes {
            for dep in &node.depends_on {
                if !ids.contains(dep) {
                    return Err(LokaError::PlanParse(format!(
                        "task '{}' depends on unknown task '{}'",
                        node.id, dep
                    ))
                    .into());
                }
            }
        }
        if !nodes.is_empty() && !nodes.iter().any(|n| n.depends_on.is_empty()) {
            return Err(LokaError::PlanParse("plan has no root task".to_string()).into());
        }

        let critical_path_len = critical_path(&nodes)?;
        Ok(TaskGraph {
            plan_id: plan_id.to_string(),
            original_query: original_query.to_string(),
            nodes,
            critical_path_len,
        })
    }

    /// A flat plan: one node per subtask, no dependencies
    pub fn from_subtasks(plan_id: &str, original_query: &str, subtasks: &[String]) -> Result<Self> {
        let nodes = subtasks
            .iter()
            .enumerate()
            .map(|(i, description)| TaskNode {
                id: format!("t{}", i),
                description: description.clone(),
                depends_on: Vec::new(),
                complexity: 0.0,
                capabilities: Vec::new(),
                tier: None,
                token_budget: None,
            })
            .collect();
        TaskGraph::new(plan_id, original_query, nodes)
    }
}

/// Kahn's algorithm; the longest layer distance is the critical path.
/// Leftover nodes mean a cycle.
fn critical_path(nodes: &[TaskNode]) -> Result<usize> {
    let mut indegree: HashMap<&str, usize> = nodes
        .iter()
        .map(|n| (n.id.as_str(), n.depends_on.len()))
        .collect();
    let mut dependants: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in nodes {
        for dep in &node.depends_on {
            dependants.entry(dep.as_str()).or_default().push(node.id.as_str());
        }
    }

    let mut depth: HashMap<&str, usize> = HashMap::new();
    let mut queue: VecDeque<&str> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    for id in &queue {
        depth.insert(*id, 1);
    }

    let mut visited = 0;
    while let Some(id) = queue.pop_front() {
        visited += 1;
        let current_depth = depth[id];
        for &dependant in dependants.get(id).into_iter().flatten() {
            let entry = indegree.get_mut(dependant).expect("validated id");
            *entry -= 1;
            let d = depth.entry(dependant).or_insert(0);
            *d = (*d).max(current_depth + 1);
            if *entry == 0 {
                queue.push_back(dependant);
            }
        }
    }

    if visited != nodes.len() {
        return Err(LokaError::PlanParse("dependency cycle in plan".to_string()).into());
    }
    Ok(depth.values().copied().max().unwrap_or(0))
}

/// Run every node through `worker`, respecting dependencies
///
/// The worker receives the node and its declaration index. Batches run
/// concurrently; the next batch is only selected once the previous one has
/// fully completed. A node failure fails the whole graph.
pub async fn execute_graph<F, Fut>(
    graph: &TaskGraph,
    worker: F,
) -> Result<HashMap<String, CompletionResult>>
where
    F: Fn(TaskNode, usize) -> Fut,
    Fut: Future<Output = Result<CompletionResult>> + Send + 'static,
{
    let index_of: HashMap<&str, usize> = graph
        .nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut uncompleted: HashSet<String> = graph.nodes.iter().map(|n| n.id.clone()).collect();
    let mut results: HashMap<String, CompletionResult> = HashMap::new();

    while !uncompleted.is_empty() {
        let ready: Vec<&TaskNode> = graph
            .nodes
            .iter()
            .filter(|n| uncompleted.contains(&n.id))
            .filter(|n| n.depends_on.iter().all(|dep| !uncompleted.contains(dep)))
            .collect();

        if ready.is_empty() {
            return Err(LokaError::DagDeadlock(format!(
                "plan {}: {} tasks blocked with none in progress",
                graph.plan_id,
                uncompleted.len()
            ))
            .into());
        }

        let mut in_progress = Vec::with_capacity(ready.len());
        for node in ready {
            uncompleted.remove(&node.id);
            let index = index_of[node.id.as_str()];
            let handle = tokio::spawn(worker(node.clone(), index));
            in_progress.push((node.id.clone(), handle));
        }

        for (id, handle) in in_progress {
            let result = handle.await.map_err(|e| anyhow::anyhow!("task panicked: {}", e))??;
            results.insert(id, result);
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn node(id: &str, deps: &[&str]) -> TaskNode {
        TaskNode {
            id: id.to_string(),
            description: format!("do {}", id),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            complexity: 0.1,
            capabilities: Vec::new(),
            tier: None,
            token_budget: None,
        }
    }

    fn dummy_result(content: &str) -> CompletionResult {
        CompletionResult {
            content: content.to_string(),
            model: "test".to_string(),
            prompt_tokens: 1,
            completion_tokens: 1,
            cost_eur: 0.0,
            latency_ms: 1,
        }
    }

    #[test]
    fn test_validation_rejects_duplicate_ids() {
        let err = TaskGraph::new("p", "q", vec![node("a", &[]), node("a", &[])]).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_validation_rejects_unknown_dependency() {
        let err = TaskGraph::new("p", "q", vec![node("a", &["ghost"])]).unwrap_err();
        assert!(err.to_string().contains("unknown task"));
    }

    #[test]
    fn test_validation_rejects_cycle() {
        let err =
            TaskGraph::new("p", "q", vec![node("a", &["b"]), node("b", &["a"])]).unwrap_err();
        assert!(err.to_string().contains("no root task") || err.to_string().contains("cycle"));
    }

    #[test]
    fn test_critical_path_length() {
        let graph = TaskGraph::new(
            "p",
            "q",
            vec![
                node("a", &[]),
                node("b", &["a"]),
                node("c", &["b"]),
                node("d", &[]),
            ],
        )
        .unwrap();
        assert_eq!(graph.critical_path_len, 3);

        let flat = TaskGraph::from_subtasks("p", "q", &["x".to_string(), "y".to_string()]).unwrap();
        assert_eq!(flat.critical_path_len, 1);
    }

    #[tokio::test]
    async fn test_execution_respects_dependencies() {
        let graph = TaskGraph::new(
            "p",
            "q",
            vec![node("a", &[]), node("b", &["a"]), node("c", &["a", "b"])],
        )
        .unwrap();

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let order_ref = Arc::clone(&order);
        let results = execute_graph(&graph, move |task, _| {
            let order = Arc::clone(&order_ref);
            async move {
                order.lock().unwrap().push(task.id.clone());
                Ok(dummy_result(&task.id))
            }
        })
        .await
        .unwrap();

        assert_eq!(results.len(), 3);
        let order = order.lock().unwrap().clone();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[tokio::test]
    async fn test_flat_graph_runs_in_one_batch() {
        let subtasks: Vec<String> = (0..4).map(|i| format!("part {}", i)).collect();
        let graph = TaskGraph::from_subtasks("p", "q", &subtasks).unwrap();

        let launched = Arc::new(AtomicUsize::new(0));
        let launched_ref = Arc::clone(&launched);
        let results = execute_graph(&graph, move |task, index| {
            let launched = Arc::clone(&launched_ref);
            async move {
                launched.fetch_add(1, Ordering::SeqCst);
                Ok(dummy_result(&format!("{}#{}", task.id, index)))
            }
        })
        .await
        .unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(launched.load(Ordering::SeqCst), 4);
        assert_eq!(results["t2"].content, "t2#2");
    }

    #[tokio::test]
    async fn test_node_failure_fails_the_graph() {
        let graph = TaskGraph::new("p", "q", vec![node("a", &[]), node("b", &[])]).unwrap();
        let err = execute_graph(&graph, |task, _| async move {
            if task.id == "b" {
                Err(anyhow::anyhow!("worker exploded"))
            } else {
                Ok(dummy_result("fine"))
            }
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("exploded"));
    }
}
