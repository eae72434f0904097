//! End-to-end scenarios through the public orchestrator API, driven
//! entirely by in-memory ports.

use std::sync::Arc;

use serde_json::json;

use maestro::domain::models::{Decomposition, Subtask, TaskInput, TaskUpdateKind, WorkflowConfig};
use maestro::domain::ports::LoopStepDecision;
use maestro::infrastructure::inmemory::{MockActivities, RecordingEventSink};
use maestro::services::retry::RetryPolicy;
use maestro::{Orchestrator, StrategyContext, StrategyKind};

fn make_orchestrator(
    activities: Arc<MockActivities>,
) -> (Orchestrator, Arc<RecordingEventSink>) {
    let events = Arc::new(RecordingEventSink::new());
    let ctx = Arc::new(
        StrategyContext::new(activities, events.clone())
            .with_retry(RetryPolicy::none())
            .with_workflow_id("wf-integration"),
    );
    (Orchestrator::new(ctx), events)
}

fn plan(subtasks: Vec<Subtask>, complexity: f64) -> Decomposition {
    Decomposition {
        complexity,
        subtasks,
        ..Default::default()
    }
}

/// Scenario 1: zero subtasks route to the trivial path with simple-mode
/// metadata.
#[tokio::test]
async fn trivial_path_scenario() {
    let activities = Arc::new(MockActivities::new());
    activities.set_simple_response("hi!", 12, "small-1").await;
    let (orchestrator, events) = make_orchestrator(activities);

    let mut input = TaskInput::new("hello");
    input.decomposition = Some(plan(vec![], 0.2));

    let result = orchestrator.run(StrategyKind::Dag, input).await;

    assert!(result.success);
    assert_eq!(result.metadata.get("mode"), Some(&json!("simple")));
    assert_eq!(result.metadata.get("num_agents"), Some(&json!(1)));
    assert!(result.metadata.contains_key("cost_usd"));
    assert!(result.metadata.contains_key("model"));
    assert!(events.saw_kind(TaskUpdateKind::WorkflowCompleted).await);
    // The final text streams under the reserved final_output agent id.
    assert_eq!(events.for_agent("final_output").await.len(), 1);
}

/// Scenario 2: three independent subtasks, concurrency capped at 2, results
/// in plan order.
#[tokio::test]
async fn parallel_no_deps_scenario() {
    let activities = Arc::new(MockActivities::new());
    for id in ["A", "B", "C"] {
        activities.set_agent_delay_ms(id, 25).await;
    }
    let mut config = WorkflowConfig::default();
    config.parallel_max_concurrency = 2;
    activities.set_workflow_config(config).await;
    let (orchestrator, _) = make_orchestrator(activities.clone());

    let mut input = TaskInput::new("three things");
    input.decomposition = Some(plan(
        vec![
            Subtask::new("A", "first"),
            Subtask::new("B", "second"),
            Subtask::new("C", "third"),
        ],
        0.6,
    ));

    let result = orchestrator.run(StrategyKind::Dag, input).await;

    assert!(result.success);
    let summaries = result.metadata["agent_summaries"].as_array().unwrap().clone();
    let ids: Vec<&str> = summaries
        .iter()
        .map(|s| s["agent_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["A", "B", "C"]);
    assert!(activities.max_concurrent_agents().await <= 2);
}

/// Scenario 3: C depends on A and B; A and B run first, output order is
/// still the plan order.
#[tokio::test]
async fn hybrid_dependency_scenario() {
    let activities = Arc::new(MockActivities::new());
    activities.set_agent_delay_ms("A", 40).await;
    activities.set_agent_delay_ms("B", 15).await;
    let (orchestrator, _) = make_orchestrator(activities.clone());

    let mut input = TaskInput::new("staged work");
    input.decomposition = Some(plan(
        vec![
            Subtask::new("A", "first"),
            Subtask::new("B", "second"),
            Subtask::new("C", "join").with_dependencies(vec!["A".into(), "B".into()]),
        ],
        0.6,
    ));

    let result = orchestrator.run(StrategyKind::Dag, input).await;

    assert!(result.success);
    let order = activities.dispatch_order().await;
    let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
    assert!(pos("C") > pos("A"));
    assert!(pos("C") > pos("B"));

    let summaries = result.metadata["agent_summaries"].as_array().unwrap().clone();
    let ids: Vec<&str> = summaries
        .iter()
        .map(|s| s["agent_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["A", "B", "C"]);
}

/// Scenario 4: a dependency cycle is a fatal plan error.
#[tokio::test]
async fn cycle_scenario() {
    let activities = Arc::new(MockActivities::new());
    let (orchestrator, events) = make_orchestrator(activities);

    let mut input = TaskInput::new("impossible");
    input.decomposition = Some(plan(
        vec![
            Subtask::new("X", "one").with_dependencies(vec!["Y".into()]),
            Subtask::new("Y", "two").with_dependencies(vec!["X".into()]),
        ],
        0.5,
    ));

    let result = orchestrator.run(StrategyKind::Dag, input).await;

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("Invalid task plan"));
    assert!(!events.saw_kind(TaskUpdateKind::WorkflowCompleted).await);
}

/// Scenario 5: react converges after one tool call and three tool-less
/// iterations, reporting a partial summary.
#[tokio::test]
async fn react_convergence_scenario() {
    let activities = Arc::new(MockActivities::new());
    activities
        .set_agent_response_sequence(
            "actor",
            vec![
                r#"{"action": "web_search", "input": {"q": "x"}}"#.to_string(),
                r#"{"action": "none"}"#.to_string(),
                r#"{"action": "none"}"#.to_string(),
                r#"{"action": "none"}"#.to_string(),
            ],
        )
        .await;
    let (orchestrator, _) = make_orchestrator(activities);

    let result = orchestrator
        .run(StrategyKind::React, TaskInput::new("open ended"))
        .await;

    assert!(result.success);
    assert_eq!(result.metadata.get("iterations"), Some(&json!(4)));
    assert!(result.result.contains("Partial findings"));
}

/// Scenario 6: all swarm agents fail; the strategy fails without invoking
/// synthesis.
#[tokio::test]
async fn swarm_all_fail_scenario() {
    let activities = Arc::new(MockActivities::new());
    let mut config = WorkflowConfig::default();
    config.swarm.help_poll_secs = 1;
    config.swarm.max_iterations_per_agent = 4;
    activities.set_workflow_config(config).await;
    activities.fail_tool("probe", "invalid arguments").await;
    let mut params = std::collections::BTreeMap::new();
    params.insert("tool".to_string(), json!("probe"));
    activities
        .set_loop_decisions(vec![LoopStepDecision {
            action: "tool_call".into(),
            params,
            tokens_used: 5,
            ..Default::default()
        }])
        .await;
    let (orchestrator, _) = make_orchestrator(activities.clone());

    let mut input = TaskInput::new("doomed");
    input.decomposition = Some(plan(
        vec![
            Subtask::new("a", "x"),
            Subtask::new("b", "y"),
            Subtask::new("c", "z"),
        ],
        0.6,
    ));

    let result = orchestrator.run(StrategyKind::Swarm, input).await;

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("All 3 agents failed"));
    assert_eq!(activities.synthesis_calls().await, 0);
}

/// Parallel token totals equal the sum of observed per-task counts.
#[tokio::test]
async fn token_total_matches_observed_usage() {
    let activities = Arc::new(MockActivities::new());
    activities.set_agent_tokens("A", 120).await;
    activities.set_agent_tokens("B", 0).await;
    activities.set_agent_tokens("C", 30).await;
    activities.set_synthesis_response("combined", 50).await;
    let (orchestrator, _) = make_orchestrator(activities);

    let mut input = TaskInput::new("count tokens");
    input.decomposition = Some(plan(
        vec![
            Subtask::new("A", "x"),
            Subtask::new("B", "y"),
            Subtask::new("C", "z"),
        ],
        0.4,
    ));

    let result = orchestrator.run(StrategyKind::Dag, input).await;

    assert!(result.success);
    // 150 agent tokens plus 50 synthesis tokens.
    assert_eq!(result.tokens_used, 200);
}
