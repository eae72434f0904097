//! Multi-perspective debate with optional moderation and voting.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::domain::ports::Activities;
use crate::services::retry::RetryPolicy;

use super::call_agent;

#[derive(Debug, Clone)]
pub struct DebateConfig {
    pub num_debaters: u32,
    pub max_rounds: u32,
    pub use_moderator: bool,
    pub enable_voting: bool,
    /// Perspective names; auto-named when absent or short.
    pub perspectives: Vec<String>,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            num_debaters: 3,
            max_rounds: 2,
            use_moderator: true,
            enable_voting: true,
            perspectives: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DebateOutcome {
    /// Latest position per debater, in sorted debater order.
    pub positions: BTreeMap<String, String>,
    pub rounds: u32,
    pub winning_argument: String,
    pub consensus_reached: bool,
    pub final_position: String,
    /// Vote tallies per debater, in sorted order.
    pub votes: BTreeMap<String, u32>,
    pub total_tokens: u64,
}

/// Runs `num_debaters` perspectives for up to `max_rounds`, each round
/// showing every debater the others' latest positions. A moderator summary
/// and a voting round are optional; consensus means a strict majority backs
/// one position.
pub struct DebatePattern {
    activities: Arc<dyn Activities>,
    retry: RetryPolicy,
    config: DebateConfig,
}

impl DebatePattern {
    pub fn new(activities: Arc<dyn Activities>, config: DebateConfig) -> Self {
        Self {
            activities,
            retry: RetryPolicy::default(),
            config,
        }
    }

    /// Debater ids, padding the provided perspectives to `num_debaters`.
    fn debater_names(&self) -> Vec<String> {
        (0..self.config.num_debaters as usize)
            .map(|i| {
                self.config
                    .perspectives
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("perspective_{}", i + 1))
            })
            .collect()
    }

    pub async fn run(
        &self,
        query: &str,
        context: BTreeMap<String, Value>,
        session_id: Option<&str>,
    ) -> DebateOutcome {
        let mut outcome = DebateOutcome::default();
        let names = self.debater_names();
        if names.is_empty() {
            outcome.final_position = query.to_string();
            return outcome;
        }

        for round in 0..self.config.max_rounds {
            outcome.rounds = round + 1;
            for name in &names {
                let others: String = outcome
                    .positions
                    .iter()
                    .filter(|(other, _)| *other != name)
                    .map(|(other, position)| format!("{other}: {position}\n"))
                    .collect();
                let prompt = format!(
                    "Debate topic: {query}\nYou argue as {name} (round {}).\n\
                     Other positions so far:\n{others}\nState your position.",
                    round + 1,
                );
                let reply = call_agent(
                    &self.activities,
                    &self.retry,
                    name,
                    "debater",
                    prompt,
                    context.clone(),
                    session_id,
                )
                .await;
                outcome.total_tokens = outcome.total_tokens.saturating_add(reply.tokens_used);
                if reply.success {
                    outcome.positions.insert(name.clone(), reply.response);
                }
            }
        }

        if self.config.enable_voting {
            for name in &names {
                let ballot_prompt = format!(
                    "Debate topic: {query}\nFinal positions:\n{}\n\
                     As {name}, vote for the single most convincing debater by name.",
                    outcome
                        .positions
                        .iter()
                        .map(|(n, p)| format!("{n}: {p}\n"))
                        .collect::<String>(),
                );
                let ballot = call_agent(
                    &self.activities,
                    &self.retry,
                    &format!("vote_{name}"),
                    "debater",
                    ballot_prompt,
                    context.clone(),
                    session_id,
                )
                .await;
                outcome.total_tokens = outcome.total_tokens.saturating_add(ballot.tokens_used);

                // Lenient ballot parse: first debater name mentioned wins the
                // vote; a spoiled ballot counts for the voter itself.
                let choice = names
                    .iter()
                    .filter(|candidate| ballot.response.contains(candidate.as_str()))
                    .min_by_key(|candidate| ballot.response.find(candidate.as_str()))
                    .cloned()
                    .unwrap_or_else(|| name.clone());
                *outcome.votes.entry(choice).or_insert(0) += 1;
            }
        }

        // Winner: most votes, ties broken by sorted name; without voting the
        // first debater's position stands.
        let winner = outcome
            .votes
            .iter()
            .max_by(|(name_a, votes_a), (name_b, votes_b)| {
                votes_a.cmp(votes_b).then(name_b.cmp(name_a))
            })
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| names[0].clone());

        outcome.winning_argument = outcome.positions.get(&winner).cloned().unwrap_or_default();
        let max_votes = outcome.votes.values().copied().max().unwrap_or(0);
        outcome.consensus_reached = u64::from(max_votes) * 2 > u64::from(self.config.num_debaters);

        if self.config.use_moderator {
            let summary_prompt = format!(
                "Debate topic: {query}\nPositions:\n{}\nWinning argument ({winner}): {}\n\
                 Summarize the debate's conclusion.",
                outcome
                    .positions
                    .iter()
                    .map(|(n, p)| format!("{n}: {p}\n"))
                    .collect::<String>(),
                outcome.winning_argument,
            );
            let summary = call_agent(
                &self.activities,
                &self.retry,
                "moderator",
                "moderator",
                summary_prompt,
                context,
                session_id,
            )
            .await;
            outcome.total_tokens = outcome.total_tokens.saturating_add(summary.tokens_used);
            outcome.final_position = if summary.success {
                summary.response
            } else {
                outcome.winning_argument.clone()
            };
        } else {
            outcome.final_position = outcome.winning_argument.clone();
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::inmemory::MockActivities;

    #[tokio::test]
    async fn test_positions_rounds_and_votes() {
        let activities = Arc::new(MockActivities::new());
        activities
            .set_agent_response("perspective_1", "argument alpha")
            .await;
        activities
            .set_agent_response("perspective_2", "argument beta")
            .await;
        activities
            .set_agent_response("perspective_3", "argument gamma")
            .await;
        // Everyone votes for perspective_2.
        activities
            .set_agent_response_prefix("vote_", "perspective_2 made the best case")
            .await;
        activities
            .set_agent_response("moderator", "the group leans to beta")
            .await;

        let debate = DebatePattern::new(activities, DebateConfig::default());
        let outcome = debate.run("topic", BTreeMap::new(), None).await;

        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.positions.len(), 3);
        assert_eq!(outcome.votes.get("perspective_2"), Some(&3));
        assert!(outcome.consensus_reached);
        assert_eq!(outcome.winning_argument, "argument beta");
        assert_eq!(outcome.final_position, "the group leans to beta");
    }

    #[tokio::test]
    async fn test_no_consensus_on_split_vote() {
        let activities = Arc::new(MockActivities::new());
        activities
            .set_agent_response("vote_perspective_1", "perspective_1")
            .await;
        activities
            .set_agent_response("vote_perspective_2", "perspective_2")
            .await;
        activities
            .set_agent_response("vote_perspective_3", "perspective_3")
            .await;

        let debate = DebatePattern::new(
            activities,
            DebateConfig {
                use_moderator: false,
                ..Default::default()
            },
        );
        let outcome = debate.run("topic", BTreeMap::new(), None).await;

        assert!(!outcome.consensus_reached);
        assert_eq!(outcome.votes.len(), 3);
    }

    #[tokio::test]
    async fn test_provided_perspectives_used() {
        let activities = Arc::new(MockActivities::new());
        let debate = DebatePattern::new(
            activities.clone(),
            DebateConfig {
                num_debaters: 2,
                max_rounds: 1,
                use_moderator: false,
                enable_voting: false,
                perspectives: vec!["optimist".into(), "skeptic".into()],
            },
        );
        let outcome = debate.run("topic", BTreeMap::new(), None).await;

        assert!(outcome.positions.contains_key("optimist"));
        assert!(outcome.positions.contains_key("skeptic"));
        assert_eq!(outcome.votes.len(), 0);
    }
}
