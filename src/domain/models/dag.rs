//! Dependency-graph validation over a decomposition plan.
//!
//! Provides dangling-reference checks, three-color DFS cycle detection, and
//! ready-set computation for the hybrid scheduler.

use std::collections::{HashMap, HashSet};

use crate::domain::errors::{OrchestratorError, OrchestratorResult};

use super::plan::{Decomposition, Subtask};

/// Three-color DFS marking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// View over a plan's dependency structure.
///
/// Indices are positions in the original subtask list, so every traversal
/// that feeds scheduling is deterministic regardless of completion order.
#[derive(Debug, Clone)]
pub struct PlanGraph {
    /// Subtask ids in plan order.
    ids: Vec<String>,
    /// Dependency edges as indices into `ids`, per subtask.
    deps: Vec<Vec<usize>>,
}

impl PlanGraph {
    /// Build and validate the graph: every dependency id must reference a
    /// subtask in the same plan, and the graph must be acyclic.
    pub fn build(plan: &Decomposition) -> OrchestratorResult<Self> {
        Self::from_subtasks(&plan.subtasks)
    }

    pub fn from_subtasks(subtasks: &[Subtask]) -> OrchestratorResult<Self> {
        let ids: Vec<String> = subtasks.iter().map(|s| s.id.clone()).collect();
        let index: HashMap<&str, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        if index.len() != ids.len() {
            return Err(OrchestratorError::InvalidPlan(
                "duplicate subtask ids".to_string(),
            ));
        }

        let mut deps = Vec::with_capacity(subtasks.len());
        for subtask in subtasks {
            let mut edges = Vec::with_capacity(subtask.dependencies.len());
            for dep in &subtask.dependencies {
                match index.get(dep.as_str()) {
                    Some(&i) => edges.push(i),
                    None => {
                        return Err(OrchestratorError::InvalidPlan(format!(
                            "subtask {} depends on unknown subtask {}",
                            subtask.id, dep
                        )))
                    }
                }
            }
            deps.push(edges);
        }

        let graph = Self { ids, deps };
        if let Some(id) = graph.find_cycle() {
            return Err(OrchestratorError::InvalidPlan(format!(
                "dependency cycle involving subtask {id}"
            )));
        }
        Ok(graph)
    }

    /// Detect a directed cycle with three-color DFS; returns a subtask id on
    /// the cycle, if any.
    fn find_cycle(&self) -> Option<&str> {
        let mut colors = vec![Color::White; self.ids.len()];
        for start in 0..self.ids.len() {
            if colors[start] == Color::White {
                if let Some(i) = self.dfs(start, &mut colors) {
                    return Some(&self.ids[i]);
                }
            }
        }
        None
    }

    fn dfs(&self, node: usize, colors: &mut [Color]) -> Option<usize> {
        colors[node] = Color::Gray;
        for &dep in &self.deps[node] {
            match colors[dep] {
                Color::Gray => return Some(dep),
                Color::White => {
                    if let Some(hit) = self.dfs(dep, colors) {
                        return Some(hit);
                    }
                }
                Color::Black => {}
            }
        }
        colors[node] = Color::Black;
        None
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Dependency ids for the subtask at `index`, in declaration order.
    pub fn dependency_ids(&self, index: usize) -> impl Iterator<Item = &str> {
        self.deps[index].iter().map(|&i| self.ids[i].as_str())
    }

    /// Indices of subtasks whose dependencies are all in `completed`, in plan
    /// order. The hybrid scheduler dispatches these next.
    pub fn ready_indices(&self, completed: &HashSet<usize>, dispatched: &HashSet<usize>) -> Vec<usize> {
        (0..self.ids.len())
            .filter(|i| !dispatched.contains(i))
            .filter(|&i| self.deps[i].iter().all(|d| completed.contains(d)))
            .collect()
    }

    /// Group subtask indices into waves of concurrently-runnable work.
    pub fn execution_waves(&self) -> Vec<Vec<usize>> {
        let mut waves = Vec::new();
        let mut completed: HashSet<usize> = HashSet::new();
        let mut dispatched: HashSet<usize> = HashSet::new();

        while dispatched.len() < self.ids.len() {
            let wave = self.ready_indices(&completed, &dispatched);
            if wave.is_empty() {
                break;
            }
            for &i in &wave {
                dispatched.insert(i);
                completed.insert(i);
            }
            waves.push(wave);
        }
        waves
    }
}
