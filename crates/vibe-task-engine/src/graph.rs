//! In-memory dependency graph
//!
//! Directed acyclic graph over task ids. Edge insertion refuses cycles, so
//! the graph is acyclic at every observable moment. Layering and critical
//! path are linear in nodes plus edges and stay sub-second well past ten
//! thousand nodes.

use crate::types::{AtomicTask, DependencyType};
use crate::EngineError;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone)]
struct TaskNode {
    task_id: String,
    estimated_hours: f64,
}

#[derive(Debug, Clone, Copy)]
struct EdgeInfo {
    dependency_type: DependencyType,
    weight: u32,
    hard: bool,
}

/// Longest weighted root-to-leaf chain in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticalPath {
    pub task_ids: Vec<String>,
    pub total_hours: f64,
}

/// Serializable form persisted as `dependency-graphs/<projectId>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub project_id: String,
    pub tasks: Vec<SnapshotTask>,
    pub edges: Vec<SnapshotEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotTask {
    pub id: String,
    pub estimated_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEdge {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub dependency_type: DependencyType,
    pub weight: u32,
    pub hard: bool,
}

/// Per-project task dependency DAG.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    project_id: String,
    graph: DiGraph<TaskNode, EdgeInfo>,
    indices: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            graph: DiGraph::new(),
            indices: HashMap::new(),
        }
    }

    /// Build a graph from tasks, wiring their recorded dependency ids.
    ///
    /// Edges are inserted without per-edge cycle checks; a stale cycle in
    /// recorded dependencies surfaces through `cyclic_tasks` and the
    /// scheduler's blocked-by-cycle handling.
    pub fn from_tasks(project_id: impl Into<String>, tasks: &[AtomicTask]) -> Self {
        let mut graph = Self::new(project_id);
        for task in tasks {
            graph.add_task(&task.id);
            graph.set_estimated_hours(&task.id, task.estimated_hours);
        }
        for task in tasks {
            for dep in &task.dependencies {
                if graph.has_task(dep) && dep != &task.id {
                    graph.add_edge_raw(dep, &task.id, DependencyType::Blocks, 1, true);
                }
            }
        }
        graph
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn add_task(&mut self, task_id: &str) {
        if !self.indices.contains_key(task_id) {
            let idx = self.graph.add_node(TaskNode {
                task_id: task_id.to_string(),
                estimated_hours: 0.0,
            });
            self.indices.insert(task_id.to_string(), idx);
        }
    }

    pub fn set_estimated_hours(&mut self, task_id: &str, hours: f64) {
        if let Some(&idx) = self.indices.get(task_id) {
            self.graph[idx].estimated_hours = hours;
        }
    }

    pub fn has_task(&self, task_id: &str) -> bool {
        self.indices.contains_key(task_id)
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Insert the edge `from -> to`, refusing anything that would close a
    /// cycle. The graph is left untouched on refusal.
    pub fn add_dependency(
        &mut self,
        from: &str,
        to: &str,
        dependency_type: DependencyType,
        weight: u32,
        hard: bool,
    ) -> Result<(), EngineError> {
        if weight == 0 {
            return Err(EngineError::Validation("dependency weight must be >= 1".into()));
        }
        let from_idx = *self
            .indices
            .get(from)
            .ok_or_else(|| EngineError::NotFound(format!("task {from}")))?;
        let to_idx = *self
            .indices
            .get(to)
            .ok_or_else(|| EngineError::NotFound(format!("task {to}")))?;

        if from_idx == to_idx {
            return Err(EngineError::Cycle(format!("{from} -> {to} is a self loop")));
        }
        if self.reaches(to_idx, from_idx) {
            return Err(EngineError::Cycle(format!(
                "adding {from} -> {to} would close a cycle"
            )));
        }

        self.graph.add_edge(
            from_idx,
            to_idx,
            EdgeInfo {
                dependency_type,
                weight,
                hard,
            },
        );
        Ok(())
    }

    /// Bulk insertion path for already-validated edge sets.
    fn add_edge_raw(&mut self, from: &str, to: &str, dependency_type: DependencyType, weight: u32, hard: bool) {
        let (Some(&from_idx), Some(&to_idx)) = (self.indices.get(from), self.indices.get(to)) else {
            return;
        };
        self.graph.add_edge(from_idx, to_idx, EdgeInfo { dependency_type, weight, hard });
    }

    /// DFS reachability with a transient visited set.
    fn reaches(&self, start: NodeIndex, target: NodeIndex) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if visited.insert(node) {
                stack.extend(self.graph.neighbors_directed(node, Direction::Outgoing));
            }
        }
        false
    }

    /// Ordered parallel-safe layers. Tasks stuck in a cycle (possible when a
    /// snapshot predates cycle checking) are excluded; see `cyclic_tasks`.
    pub fn topological_layers(&self) -> Vec<Vec<String>> {
        self.layering().0
    }

    /// Tasks that cannot be layered because they sit on a cycle.
    pub fn cyclic_tasks(&self) -> Vec<String> {
        self.layering().1
    }

    fn layering(&self) -> (Vec<Vec<String>>, Vec<String>) {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| (n, self.graph.neighbors_directed(n, Direction::Incoming).count()))
            .collect();

        let mut frontier: Vec<NodeIndex> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut layers = Vec::new();
        let mut emitted = 0usize;

        while !frontier.is_empty() {
            let mut layer: Vec<String> = frontier
                .iter()
                .map(|n| self.graph[*n].task_id.clone())
                .collect();
            layer.sort();
            emitted += layer.len();
            layers.push(layer);

            let mut next = Vec::new();
            for node in frontier {
                for succ in self.graph.neighbors_directed(node, Direction::Outgoing) {
                    let d = in_degree.get_mut(&succ).expect("known node");
                    *d -= 1;
                    if *d == 0 {
                        next.push(succ);
                    }
                }
            }
            next.sort();
            next.dedup();
            frontier = next;
        }

        let mut cyclic: Vec<String> = Vec::new();
        if emitted < self.graph.node_count() {
            cyclic = in_degree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(n, _)| self.graph[*n].task_id.clone())
                .collect();
            cyclic.sort();
        }
        (layers, cyclic)
    }

    /// Longest weighted path from any root to any leaf, weighted by each
    /// task's estimated hours.
    pub fn critical_path(&self) -> CriticalPath {
        let order: Vec<NodeIndex> = self
            .topological_layers()
            .iter()
            .flatten()
            .map(|id| self.indices[id])
            .collect();

        let mut best: HashMap<NodeIndex, (f64, Option<NodeIndex>)> = HashMap::new();
        for &node in &order {
            let own = self.graph[node].estimated_hours;
            let incoming_best = self
                .graph
                .edges_directed(node, Direction::Incoming)
                .filter_map(|e| best.get(&e.source()).map(|(len, _)| (*len, e.source())))
                .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            match incoming_best {
                Some((len, pred)) => best.insert(node, (len + own, Some(pred))),
                None => best.insert(node, (own, None)),
            };
        }

        let Some((&end, &(total, _))) = best
            .iter()
            .max_by(|a, b| a.1 .0.partial_cmp(&b.1 .0).unwrap_or(std::cmp::Ordering::Equal))
        else {
            return CriticalPath { task_ids: Vec::new(), total_hours: 0.0 };
        };

        let mut path = Vec::new();
        let mut cursor = Some(end);
        while let Some(node) = cursor {
            path.push(self.graph[node].task_id.clone());
            cursor = best.get(&node).and_then(|(_, pred)| *pred);
        }
        path.reverse();
        CriticalPath { task_ids: path, total_hours: total }
    }

    /// Tasks whose hard dependencies are all in `completed` and which are
    /// not themselves completed.
    pub fn ready_tasks(&self, completed: &HashSet<String>) -> Vec<String> {
        let mut ready: Vec<String> = self
            .graph
            .node_indices()
            .filter(|&n| !completed.contains(&self.graph[n].task_id))
            .filter(|&n| {
                self.graph
                    .edges_directed(n, Direction::Incoming)
                    .filter(|e| e.weight().hard)
                    .all(|e| completed.contains(&self.graph[e.source()].task_id))
            })
            .map(|n| self.graph[n].task_id.clone())
            .collect();
        ready.sort();
        ready
    }

    /// Hard prerequisites of one task.
    pub fn hard_dependencies_of(&self, task_id: &str) -> Vec<String> {
        let Some(&idx) = self.indices.get(task_id) else {
            return Vec::new();
        };
        let mut deps: Vec<String> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter(|e| e.weight().hard)
            .map(|e| self.graph[e.source()].task_id.clone())
            .collect();
        deps.sort();
        deps
    }

    /// Longest node-weighted chain from each task down to a leaf, including
    /// the task's own hours. Tasks on a cycle are absent.
    pub fn remaining_chain_hours(&self) -> HashMap<String, f64> {
        let layers = self.topological_layers();
        let mut chain: HashMap<NodeIndex, f64> = HashMap::new();
        for layer in layers.iter().rev() {
            for id in layer {
                let idx = self.indices[id];
                let best_succ = self
                    .graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .filter_map(|s| chain.get(&s).copied())
                    .fold(0.0_f64, f64::max);
                chain.insert(idx, self.graph[idx].estimated_hours + best_succ);
            }
        }
        chain
            .into_iter()
            .map(|(idx, hours)| (self.graph[idx].task_id.clone(), hours))
            .collect()
    }

    /// Transitive count of downstream tasks, used by dependency scoring.
    pub fn downstream_count(&self, task_id: &str) -> usize {
        let Some(&idx) = self.indices.get(task_id) else {
            return 0;
        };
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([idx]);
        while let Some(node) = queue.pop_front() {
            for succ in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if visited.insert(succ) {
                    queue.push_back(succ);
                }
            }
        }
        visited.len()
    }

    pub fn to_snapshot(&self) -> GraphSnapshot {
        let mut tasks: Vec<SnapshotTask> = self
            .graph
            .node_indices()
            .map(|n| SnapshotTask {
                id: self.graph[n].task_id.clone(),
                estimated_hours: self.graph[n].estimated_hours,
            })
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));

        let mut edges: Vec<SnapshotEdge> = self
            .graph
            .edge_references()
            .map(|e| SnapshotEdge {
                from: self.graph[e.source()].task_id.clone(),
                to: self.graph[e.target()].task_id.clone(),
                dependency_type: e.weight().dependency_type,
                weight: e.weight().weight,
                hard: e.weight().hard,
            })
            .collect();
        edges.sort_by(|a, b| (a.from.as_str(), a.to.as_str()).cmp(&(b.from.as_str(), b.to.as_str())));

        GraphSnapshot {
            project_id: self.project_id.clone(),
            tasks,
            edges,
        }
    }

    pub fn from_snapshot(snapshot: &GraphSnapshot) -> Result<Self, EngineError> {
        let mut graph = Self::new(snapshot.project_id.clone());
        for task in &snapshot.tasks {
            graph.add_task(&task.id);
            graph.set_estimated_hours(&task.id, task.estimated_hours);
        }
        for edge in &snapshot.edges {
            graph.add_edge_raw(&edge.from, &edge.to, edge.dependency_type, edge.weight, edge.hard);
        }
        // One acyclicity validation for the whole snapshot instead of a
        // reachability walk per edge.
        let cyclic = graph.cyclic_tasks();
        if !cyclic.is_empty() {
            return Err(EngineError::Cycle(format!(
                "snapshot for {} contains a cycle through {}",
                snapshot.project_id,
                cyclic.join(", ")
            )));
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_graph() -> DependencyGraph {
        let mut g = DependencyGraph::new("P1");
        g.add_task("A");
        g.add_task("B");
        g
    }

    #[test]
    fn test_cycle_of_two_is_refused_and_graph_unchanged() {
        let mut g = two_node_graph();
        g.add_dependency("A", "B", DependencyType::Blocks, 1, true).unwrap();
        let err = g.add_dependency("B", "A", DependencyType::Blocks, 1, true).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Cycle);
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.topological_layers(), vec![vec!["A".to_string()], vec!["B".to_string()]]);
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let mut g = two_node_graph();
        let err = g.add_dependency("A", "A", DependencyType::Blocks, 1, true).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Cycle);
    }

    #[test]
    fn test_layers_never_order_a_task_before_a_hard_dependency() {
        let mut g = DependencyGraph::new("P1");
        for id in ["A", "B", "C", "D"] {
            g.add_task(id);
        }
        g.add_dependency("A", "B", DependencyType::Blocks, 1, true).unwrap();
        g.add_dependency("A", "C", DependencyType::Blocks, 1, true).unwrap();
        g.add_dependency("B", "D", DependencyType::Blocks, 1, true).unwrap();
        g.add_dependency("C", "D", DependencyType::Blocks, 1, true).unwrap();

        let layers = g.topological_layers();
        assert_eq!(layers, vec![
            vec!["A".to_string()],
            vec!["B".to_string(), "C".to_string()],
            vec!["D".to_string()],
        ]);

        let position = |id: &str| layers.iter().position(|l| l.iter().any(|t| t == id)).unwrap();
        for (from, to) in [("A", "B"), ("A", "C"), ("B", "D"), ("C", "D")] {
            assert!(position(from) < position(to));
        }
    }

    #[test]
    fn test_critical_path_takes_the_heavier_branch() {
        let mut g = DependencyGraph::new("P1");
        for (id, hours) in [("A", 1.0), ("B", 5.0), ("C", 1.0), ("D", 2.0)] {
            g.add_task(id);
            g.set_estimated_hours(id, hours);
        }
        g.add_dependency("A", "B", DependencyType::Blocks, 1, true).unwrap();
        g.add_dependency("A", "C", DependencyType::Blocks, 1, true).unwrap();
        g.add_dependency("B", "D", DependencyType::Blocks, 1, true).unwrap();
        g.add_dependency("C", "D", DependencyType::Blocks, 1, true).unwrap();

        let cp = g.critical_path();
        assert_eq!(cp.task_ids, vec!["A", "B", "D"]);
        assert!((cp.total_hours - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_ready_tasks_respect_hard_edges_only() {
        let mut g = DependencyGraph::new("P1");
        for id in ["A", "B", "C"] {
            g.add_task(id);
        }
        g.add_dependency("A", "B", DependencyType::Blocks, 1, true).unwrap();
        g.add_dependency("A", "C", DependencyType::Related, 1, false).unwrap();

        let none_done = g.ready_tasks(&HashSet::new());
        assert_eq!(none_done, vec!["A", "C"]);

        let a_done: HashSet<String> = ["A".to_string()].into();
        assert_eq!(g.ready_tasks(&a_done), vec!["B", "C"]);
    }

    #[test]
    fn test_downstream_count_is_transitive() {
        let mut g = DependencyGraph::new("P1");
        for id in ["A", "B", "C"] {
            g.add_task(id);
        }
        g.add_dependency("A", "B", DependencyType::Blocks, 1, true).unwrap();
        g.add_dependency("B", "C", DependencyType::Blocks, 1, true).unwrap();
        assert_eq!(g.downstream_count("A"), 2);
        assert_eq!(g.downstream_count("C"), 0);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut g = DependencyGraph::new("P1");
        g.add_task("A");
        g.add_task("B");
        g.set_estimated_hours("A", 0.5);
        g.add_dependency("A", "B", DependencyType::Enables, 3, false).unwrap();

        let snapshot = g.to_snapshot();
        let restored = DependencyGraph::from_snapshot(&snapshot).unwrap();
        assert_eq!(restored.task_count(), 2);
        assert_eq!(restored.edge_count(), 1);
        assert_eq!(restored.to_snapshot().edges[0].weight, 3);
    }

    #[test]
    fn test_large_graph_layers_quickly() {
        let mut g = DependencyGraph::new("P1");
        let n = 10_000;
        for i in 0..n {
            g.add_task(&format!("T{i:05}"));
        }
        // Three forward edges per node keeps the graph acyclic.
        for i in 0..n - 3 {
            for j in 1..=3 {
                g.add_edge_raw(
                    &format!("T{i:05}"),
                    &format!("T{:05}", i + j),
                    DependencyType::Blocks,
                    1,
                    true,
                );
            }
        }
        let started = std::time::Instant::now();
        let layers = g.topological_layers();
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        assert_eq!(layers.iter().map(|l| l.len()).sum::<usize>(), n);
    }
}
