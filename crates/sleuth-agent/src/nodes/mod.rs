//! Workflow nodes
//!
//! Each node reads the current state, calls at most one collaborator per
//! concern, and returns a partial [`StateUpdate`]. Collaborator failures
//! degrade the node's output instead of failing the run.

mod exec;
mod post;
mod pre;

use std::sync::Arc;

use crate::{
    artifact::ReportSink,
    graph::NodeId,
    inference::Inference,
    memory::Memory,
    search::Search,
    state::{AgentState, StateUpdate},
    streaming::BufferRegistry,
    workflow::WorkflowConfig,
};

/// Collaborators the nodes call out to
#[derive(Clone)]
pub struct Services {
    pub inference: Arc<dyn Inference>,
    pub search: Arc<dyn Search>,
    pub memory: Arc<dyn Memory>,
    pub reports: Arc<dyn ReportSink>,
    pub buffers: BufferRegistry,
}

/// Run a single node against the state
pub(crate) async fn run_node(
    node: NodeId,
    state: &AgentState,
    services: &Services,
    config: &WorkflowConfig,
) -> StateUpdate {
    match node {
        NodeId::Guard => pre::guard(state, config),
        NodeId::Context => pre::retrieve_context(state, services, config).await,
        NodeId::IntentClassifier => pre::classify_intent(state, services, config).await,
        NodeId::Planner => exec::plan(state, services).await,
        NodeId::QuickMode => exec::quick_answer(state, services).await,
        NodeId::DeepResearch => exec::deep_research(state, services).await,
        NodeId::GapAnalysis => exec::analyze_gaps(state, services).await,
        NodeId::Synthesize => exec::synthesize(state, services).await,
        NodeId::Formatter => post::format_output(state, services).await,
        NodeId::ClarifyUser => post::clarify_user(state, services).await,
    }
}

/// The first `max` characters of `s`
pub(crate) fn clip(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_on_char_boundaries() {
        assert_eq!(clip("hello", 10), "hello");
        assert_eq!(clip("hello", 3), "hel");
        assert_eq!(clip("wörld", 2), "wö");
        assert_eq!(clip("", 0), "");
    }
}
