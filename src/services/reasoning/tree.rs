//! Tree-of-thoughts: bounded best-first search with pruning.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::domain::ports::Activities;
use crate::services::execution::extract_numeric_value;
use crate::services::retry::RetryPolicy;

use super::call_agent;

/// Search bounds.
#[derive(Debug, Clone)]
pub struct TreeConfig {
    pub max_depth: u32,
    pub branching_factor: u32,
    /// Thoughts scoring below this are discarded.
    pub pruning_threshold: f64,
    /// Global cap on expanded nodes.
    pub exploration_budget: u32,
    pub backtrack_enabled: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            branching_factor: 3,
            pruning_threshold: 0.3,
            exploration_budget: 20,
            backtrack_enabled: true,
        }
    }
}

/// One node of the exploration tree.
#[derive(Debug, Clone)]
pub struct ThoughtNode {
    pub id: usize,
    pub parent: Option<usize>,
    pub depth: u32,
    pub thought: String,
    pub score: f64,
    pub pruned: bool,
}

/// Search report.
#[derive(Debug, Clone, Default)]
pub struct TreeOutcome {
    pub solution: String,
    pub confidence: f64,
    /// Thought texts from root to the best leaf.
    pub best_path: Vec<String>,
    /// Full exploration tree in creation order.
    pub nodes: Vec<ThoughtNode>,
    pub thoughts_explored: u32,
    pub depth_reached: u32,
    pub total_tokens: u64,
}

/// Best-first exploration: the highest-scoring open node expands next, ties
/// broken by node id so the search is deterministic. Pruned nodes can be
/// revived when backtracking is enabled and the frontier empties.
pub struct TreeOfThoughts {
    activities: Arc<dyn Activities>,
    retry: RetryPolicy,
    config: TreeConfig,
}

impl TreeOfThoughts {
    pub fn new(activities: Arc<dyn Activities>, config: TreeConfig) -> Self {
        Self {
            activities,
            retry: RetryPolicy::default(),
            config,
        }
    }

    pub async fn run(
        &self,
        query: &str,
        context: BTreeMap<String, Value>,
        session_id: Option<&str>,
    ) -> TreeOutcome {
        let mut outcome = TreeOutcome::default();

        // Root holds the problem statement itself.
        outcome.nodes.push(ThoughtNode {
            id: 0,
            parent: None,
            depth: 0,
            thought: query.to_string(),
            score: 1.0,
            pruned: false,
        });
        let mut frontier: Vec<usize> = vec![0];
        let mut expansions = 0u32;

        while expansions < self.config.exploration_budget {
            let Some(current) = pick_best(&frontier, &outcome.nodes) else {
                if self.config.backtrack_enabled {
                    if let Some(revived) = best_pruned(&outcome.nodes) {
                        debug!(node = revived, "backtracking into pruned node");
                        outcome.nodes[revived].pruned = false;
                        frontier.push(revived);
                        continue;
                    }
                }
                break;
            };
            frontier.retain(|&i| i != current);

            if outcome.nodes[current].depth >= self.config.max_depth {
                continue;
            }
            expansions += 1;

            let path = path_to(&outcome.nodes, current);
            let expand_prompt = format!(
                "Problem: {query}\n\nPath so far:\n{}\n\nPropose {} distinct next \
                 thoughts, one per line.",
                path.join("\n"),
                self.config.branching_factor,
            );
            let expansion = call_agent(
                &self.activities,
                &self.retry,
                &format!("tot_expand_{current}"),
                "explorer",
                expand_prompt,
                context.clone(),
                session_id,
            )
            .await;
            outcome.total_tokens = outcome.total_tokens.saturating_add(expansion.tokens_used);
            if !expansion.success {
                continue;
            }

            let candidates: Vec<String> = expansion
                .response
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .take(self.config.branching_factor as usize)
                .map(str::to_string)
                .collect();

            for thought in candidates {
                let score = self
                    .score_thought(query, &thought, &context, session_id, &mut outcome)
                    .await;

                let id = outcome.nodes.len();
                let depth = outcome.nodes[current].depth + 1;
                let pruned = score < self.config.pruning_threshold;
                outcome.nodes.push(ThoughtNode {
                    id,
                    parent: Some(current),
                    depth,
                    thought,
                    score,
                    pruned,
                });
                outcome.thoughts_explored += 1;
                outcome.depth_reached = outcome.depth_reached.max(depth);
                if !pruned {
                    frontier.push(id);
                }
            }
        }

        // Best solution: the leaf with the highest accumulated path score.
        let best_leaf = outcome
            .nodes
            .iter()
            .filter(|n| n.id != 0 && !n.pruned)
            .max_by(|a, b| {
                let sa = accumulated_score(&outcome.nodes, a.id);
                let sb = accumulated_score(&outcome.nodes, b.id);
                sa.partial_cmp(&sb)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    // Deterministic tie-break: earliest node wins.
                    .then(b.id.cmp(&a.id))
            });

        if let Some(leaf) = best_leaf {
            outcome.best_path = path_to(&outcome.nodes, leaf.id);
            outcome.solution = leaf.thought.clone();
            outcome.confidence = accumulated_score(&outcome.nodes, leaf.id).clamp(0.0, 1.0);
        } else {
            outcome.solution = query.to_string();
            outcome.confidence = 0.0;
        }
        outcome
    }

    async fn score_thought(
        &self,
        query: &str,
        thought: &str,
        context: &BTreeMap<String, Value>,
        session_id: Option<&str>,
        outcome: &mut TreeOutcome,
    ) -> f64 {
        let prompt = format!(
            "Problem: {query}\nCandidate thought: {thought}\n\n\
             Score this thought's promise from 0.0 to 1.0."
        );
        let evaluation = call_agent(
            &self.activities,
            &self.retry,
            "tot_score",
            "evaluator",
            prompt,
            context.clone(),
            session_id,
        )
        .await;
        outcome.total_tokens = outcome.total_tokens.saturating_add(evaluation.tokens_used);
        if !evaluation.success {
            return 0.0;
        }
        extract_numeric_value(&evaluation.response)
            .map(|v| if v > 1.0 { v / 10.0 } else { v })
            .map_or(0.0, |v| v.clamp(0.0, 1.0))
    }
}

/// Highest-scoring frontier node; ties break toward the lowest id.
fn pick_best(frontier: &[usize], nodes: &[ThoughtNode]) -> Option<usize> {
    frontier
        .iter()
        .copied()
        .max_by(|&a, &b| {
            nodes[a]
                .score
                .partial_cmp(&nodes[b].score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.cmp(&a))
        })
}

/// Best pruned, never-expanded node for backtracking.
fn best_pruned(nodes: &[ThoughtNode]) -> Option<usize> {
    nodes
        .iter()
        .filter(|n| n.pruned)
        .max_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.id.cmp(&a.id))
        })
        .map(|n| n.id)
}

/// Mean score along the root-to-node path (root excluded).
fn accumulated_score(nodes: &[ThoughtNode], id: usize) -> f64 {
    let mut total = 0.0;
    let mut count = 0u32;
    let mut cursor = Some(id);
    while let Some(i) = cursor {
        if i != 0 {
            total += nodes[i].score;
            count += 1;
        }
        cursor = nodes[i].parent;
    }
    if count == 0 {
        0.0
    } else {
        total / f64::from(count)
    }
}

/// Thought texts from root to `id`, inclusive.
fn path_to(nodes: &[ThoughtNode], id: usize) -> Vec<String> {
    let mut path = Vec::new();
    let mut cursor = Some(id);
    while let Some(i) = cursor {
        path.push(nodes[i].thought.clone());
        cursor = nodes[i].parent;
    }
    path.reverse();
    path
}
