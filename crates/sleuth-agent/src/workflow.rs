//! The workflow state machine

use std::sync::Arc;

use crate::{
    checkpoint::CheckpointStore,
    error::{Error, Result},
    graph::{NodeId, RoutingPolicy, Target, TransitionTable},
    nodes::{self, Services},
    progress::RunProgress,
    state::{AgentState, DEFAULT_BUDGET_LIMIT},
    streaming::BufferRegistry,
};

/// Workflow configuration
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Thresholds for the conditional transitions
    pub policy: RoutingPolicy,
    /// Token budget per query
    pub budget_limit: u64,
    /// Memory snippets retrieved per query
    pub context_results: usize,
    /// Hard cap on node executions per run
    pub max_steps: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            policy: RoutingPolicy::default(),
            budget_limit: DEFAULT_BUDGET_LIMIT,
            context_results: 2,
            max_steps: 64,
        }
    }
}

/// One query to run within a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Checkpoint key; history carries over between runs with the same id
    pub session_id: String,
    pub query: String,
}

impl RunRequest {
    pub fn new(session_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            query: query.into(),
        }
    }
}

/// Walks the transition table from the guard node to END
pub struct Workflow {
    services: Services,
    checkpoints: Arc<dyn CheckpointStore>,
    table: TransitionTable,
    config: WorkflowConfig,
}

impl Workflow {
    pub fn new(services: Services, checkpoints: Arc<dyn CheckpointStore>, config: WorkflowConfig) -> Self {
        let table = TransitionTable::standard(config.policy);
        Self {
            services,
            checkpoints,
            table,
            config,
        }
    }

    /// Replace the transition table
    pub fn with_table(mut self, table: TransitionTable) -> Self {
        self.table = table;
        self
    }

    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn buffers(&self) -> &BufferRegistry {
        &self.services.buffers
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Prior history and context for a session, if a checkpoint exists
    async fn seed_state(&self, request: &RunRequest) -> AgentState {
        let mut state = AgentState::new(request.query.clone());
        match self.checkpoints.load(&request.session_id).await {
            Ok(Some(previous)) => {
                tracing::debug!(
                    session = %request.session_id,
                    history = previous.history.len(),
                    "Resuming from checkpoint"
                );
                state.history = previous.history;
                state.context = previous.context;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(session = %request.session_id, "Ignoring unreadable checkpoint: {}", e);
            }
        }
        state
    }

    /// Run one query to completion, reporting node progress as it goes.
    ///
    /// A checkpoint is saved after every node; a failed save aborts the run.
    pub async fn run(&self, request: &RunRequest, progress: &RunProgress) -> Result<AgentState> {
        let mut state = self.seed_state(request).await;
        let mut node = self.table.entry();
        let mut steps = 0;

        loop {
            if steps >= self.config.max_steps {
                return Err(Error::StateMachine(format!(
                    "step cap of {} reached at '{}'",
                    self.config.max_steps, node
                )));
            }
            steps += 1;

            let update = nodes::run_node(node, &state, &self.services, &self.config).await;
            state.apply(update);
            if node == NodeId::Guard {
                progress.set_query_id(&state.query_id);
            }

            self.checkpoints.save(&request.session_id, &state).await?;
            progress.record_node(node);

            tracing::debug!(
                query_id = %state.query_id,
                node = %node,
                tokens = state.token_usage,
                iteration = state.iterations,
                "Node finished"
            );

            match self.table.next(node, &state)? {
                Target::Node(next) => node = next,
                Target::End => break,
            }
        }

        tracing::info!(
            query_id = %state.query_id,
            steps,
            tokens = state.token_usage,
            mode = ?state.mode,
            "Run finished"
        );
        Ok(state)
    }

    /// Run a query without observing progress
    pub async fn invoke(&self, request: &RunRequest) -> Result<AgentState> {
        let progress = RunProgress::new();
        let result = self.run(request, &progress).await;
        // Nothing drains an unobserved run's buffer
        if let Some(query_id) = progress.query_id() {
            self.services.buffers.clear(&query_id);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::graph::{Condition, Transition};
    use crate::prompts;
    use crate::state::Mode;
    use crate::testing::{FailingCheckpoints, RecordingSearch, ScriptedInference, services_with};

    const CLEAR_INTENT: &str =
        r#"{"category": "CONCEPT", "confidence_score": 0.95, "is_clear": true, "clarification_question": ""}"#;

    fn workflow(inference: ScriptedInference) -> (Workflow, Arc<InMemoryCheckpointStore>) {
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let workflow = Workflow::new(
            services_with(Arc::new(inference)),
            checkpoints.clone(),
            WorkflowConfig::default(),
        );
        (workflow, checkpoints)
    }

    fn deep_inference(gap_reply: &str) -> ScriptedInference {
        ScriptedInference::new()
            .reply(prompts::INTENT_SYSTEM, CLEAR_INTENT)
            .reply(prompts::PLANNER_SYSTEM, "deep")
            .reply(prompts::GAP_SYSTEM, gap_reply)
            .stream(prompts::SYNTHESIS_SYSTEM, &["# Executive Summary\n", "Report."])
    }

    #[tokio::test]
    async fn test_unclear_query_gets_clarification() {
        let inference = ScriptedInference::new()
            .reply(
                prompts::INTENT_SYSTEM,
                r#"{"category": "GENERAL", "confidence_score": 0.3, "is_clear": false, "clarification_question": "What do you need help with?"}"#,
            )
            .reply(prompts::CLARIFY_SYSTEM, "Could you tell me what you are working on?");
        let inference = Arc::new(inference);
        let workflow = Workflow::new(
            services_with(inference.clone()),
            Arc::new(InMemoryCheckpointStore::new()),
            WorkflowConfig::default(),
        );
        let progress = RunProgress::new();

        let state = workflow
            .run(&RunRequest::new("s", "help"), &progress)
            .await
            .unwrap();

        assert_eq!(
            progress.nodes(),
            vec![NodeId::Guard, NodeId::Context, NodeId::IntentClassifier, NodeId::ClarifyUser]
        );
        assert_eq!(state.mode, Some(Mode::Clarification));
        assert!(!state.is_clarified);
        assert_eq!(state.final_report, "Could you tell me what you are working on?");
        assert_eq!(progress.query_id().as_deref(), Some(state.query_id.as_str()));
        assert_eq!(inference.calls(prompts::PLANNER_SYSTEM), 0);
        assert_eq!(inference.calls(prompts::QUICK_SYSTEM), 0);
        assert_eq!(inference.calls(prompts::SYNTHESIS_SYSTEM), 0);
    }

    #[tokio::test]
    async fn test_clear_query_never_reaches_clarification() {
        let inference = ScriptedInference::new()
            .reply(prompts::INTENT_SYSTEM, CLEAR_INTENT)
            .reply(prompts::PLANNER_SYSTEM, "quick")
            .stream(prompts::QUICK_SYSTEM, &["CFS ", "is ", "fair."]);
        let (workflow, _) = workflow(inference);
        let progress = RunProgress::new();

        let state = workflow
            .run(&RunRequest::new("s", "What is CFS?"), &progress)
            .await
            .unwrap();

        let nodes = progress.nodes();
        assert!(!nodes.contains(&NodeId::ClarifyUser));
        assert_eq!(nodes.last(), Some(&NodeId::Formatter));
        assert_eq!(state.mode, Some(Mode::Quick));
        assert!(state.final_report.starts_with("CFS is fair."));
        assert!(state.final_report.contains("> **Mode:** quick"));
    }

    #[tokio::test]
    async fn test_refinement_loop_is_bounded() {
        let (workflow, _) = workflow(deep_inference(r#"{"confidence_score": 0.4, "gaps": ["benchmarks"]}"#));
        let progress = RunProgress::new();

        let state = workflow
            .run(&RunRequest::new("s", "Compare CFS and EEVDF"), &progress)
            .await
            .unwrap();

        let nodes = progress.nodes();
        let research_passes = nodes.iter().filter(|n| **n == NodeId::DeepResearch).count();
        assert_eq!(research_passes, 3);
        assert_eq!(nodes.iter().filter(|n| **n == NodeId::GapAnalysis).count(), 3);
        assert_eq!(state.iterations, 3);
        assert_eq!(state.research_data.len(), 3);
        assert_eq!(nodes.iter().filter(|n| **n == NodeId::Formatter).count(), 1);
    }

    #[tokio::test]
    async fn test_token_heavy_research_still_runs_three_passes() {
        let verbose_gap = format!(
            "{}\n{}",
            r#"{"confidence_score": 0.4, "gaps": ["benchmarks"]}"#,
            "The sources disagree on tail latency. ".repeat(320)
        );
        let (workflow, _) = workflow(deep_inference(&verbose_gap));
        let progress = RunProgress::new();

        let state = workflow
            .run(&RunRequest::new("s", "Compare CFS and EEVDF"), &progress)
            .await
            .unwrap();

        assert!(state.token_usage > state.budget_limit);
        assert_eq!(state.research_confidence_score, 0.4);
        let passes = progress
            .nodes()
            .iter()
            .filter(|n| **n == NodeId::DeepResearch)
            .count();
        assert_eq!(passes, 3);
    }

    #[tokio::test]
    async fn test_invoke_leaves_no_buffer_behind() {
        let inference = ScriptedInference::new()
            .reply(prompts::INTENT_SYSTEM, CLEAR_INTENT)
            .reply(prompts::PLANNER_SYSTEM, "quick")
            .stream(prompts::QUICK_SYSTEM, &["CFS ", "is ", "fair."]);
        let (workflow, _) = workflow(inference);

        let state = workflow.invoke(&RunRequest::new("s", "What is CFS?")).await.unwrap();

        assert!(state.final_report.starts_with("CFS is fair."));
        assert!(workflow.buffers().get(&state.query_id).is_none());
        assert!(workflow.buffers().is_empty());
    }

    #[tokio::test]
    async fn test_confident_research_exits_after_one_pass() {
        let (workflow, _) = workflow(deep_inference(r#"{"confidence_score": 0.92, "gaps": []}"#));
        let progress = RunProgress::new();
        workflow
            .run(&RunRequest::new("s", "Compare CFS and EEVDF"), &progress)
            .await
            .unwrap();
        assert_eq!(
            progress.nodes(),
            vec![
                NodeId::Guard,
                NodeId::Context,
                NodeId::IntentClassifier,
                NodeId::Planner,
                NodeId::DeepResearch,
                NodeId::GapAnalysis,
                NodeId::Synthesize,
                NodeId::Formatter,
            ]
        );
    }

    #[tokio::test]
    async fn test_gaps_steer_next_search() {
        let search = Arc::new(RecordingSearch::raw("findings"));
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let mut services = services_with(Arc::new(deep_inference(
            r#"{"confidence_score": 0.5, "gaps": ["latency", "fairness"]}"#,
        )));
        services.search = search.clone();
        let workflow = Workflow::new(services, checkpoints, WorkflowConfig::default());

        workflow
            .invoke(&RunRequest::new("s", "CFS vs EEVDF"))
            .await
            .unwrap();

        let queries = search.queries();
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0], "CFS vs EEVDF");
        assert_eq!(queries[1], "CFS vs EEVDF focusing on: latency, fairness");
    }

    #[tokio::test]
    async fn test_history_carries_across_runs() {
        let inference = ScriptedInference::new()
            .reply(prompts::INTENT_SYSTEM, CLEAR_INTENT)
            .reply(prompts::PLANNER_SYSTEM, "quick")
            .stream(prompts::QUICK_SYSTEM, &["answer"]);
        let (workflow, checkpoints) = workflow(inference);

        workflow.invoke(&RunRequest::new("s", "first")).await.unwrap();
        let state = workflow.invoke(&RunRequest::new("s", "second")).await.unwrap();

        let contents: Vec<&str> = state.history.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents.len(), 4);
        assert_eq!(contents[0], "first");
        assert_eq!(contents[2], "second");
        assert_eq!(checkpoints.load("s").await.unwrap().unwrap(), state);

        // A different session starts fresh
        let other = workflow.invoke(&RunRequest::new("t", "third")).await.unwrap();
        assert_eq!(other.history.len(), 2);
    }

    #[tokio::test]
    async fn test_checkpoint_failure_is_fatal() {
        let workflow = Workflow::new(
            services_with(Arc::new(ScriptedInference::new())),
            Arc::new(FailingCheckpoints),
            WorkflowConfig::default(),
        );
        let progress = RunProgress::new();
        let err = workflow
            .run(&RunRequest::new("s", "q"), &progress)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Checkpoint(_)));
        assert!(progress.nodes().is_empty());
    }

    #[tokio::test]
    async fn test_step_cap_stops_cyclic_table() {
        let rows = vec![
            Transition {
                from: NodeId::Guard,
                when: Condition::Always,
                to: Target::Node(NodeId::Context),
            },
            Transition {
                from: NodeId::Context,
                when: Condition::Always,
                to: Target::Node(NodeId::Guard),
            },
        ];
        let (workflow, _) = workflow(ScriptedInference::new());
        let workflow = workflow.with_table(TransitionTable::from_rows(rows, RoutingPolicy::default()));
        let progress = RunProgress::new();

        let err = workflow
            .run(&RunRequest::new("s", "q"), &progress)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StateMachine(_)));
        assert_eq!(progress.nodes().len(), 64);
    }

    #[tokio::test]
    async fn test_missing_transition_is_fatal() {
        let rows = vec![Transition {
            from: NodeId::Guard,
            when: Condition::ModeDeep,
            to: Target::End,
        }];
        let (workflow, _) = workflow(ScriptedInference::new());
        let workflow = workflow.with_table(TransitionTable::from_rows(rows, RoutingPolicy::default()));
        let err = workflow.invoke(&RunRequest::new("s", "q")).await.unwrap_err();
        assert!(matches!(err, Error::StateMachine(_)));
    }
}
