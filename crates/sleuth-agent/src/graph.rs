//! The transition table that sequences workflow nodes
//!
//! Rows are plain data. For a given node the first row whose condition holds
//! wins, so an unconditional row placed last acts as "otherwise".

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    error::{Error, Result},
    state::{AgentState, Mode},
};

/// Identifies a node in the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Guard,
    Context,
    IntentClassifier,
    Planner,
    QuickMode,
    DeepResearch,
    GapAnalysis,
    Synthesize,
    Formatter,
    ClarifyUser,
}

impl NodeId {
    pub const ALL: [NodeId; 10] = [
        NodeId::Guard,
        NodeId::Context,
        NodeId::IntentClassifier,
        NodeId::Planner,
        NodeId::QuickMode,
        NodeId::DeepResearch,
        NodeId::GapAnalysis,
        NodeId::Synthesize,
        NodeId::Formatter,
        NodeId::ClarifyUser,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            NodeId::Guard => "guard",
            NodeId::Context => "context",
            NodeId::IntentClassifier => "intent_classifier",
            NodeId::Planner => "planner",
            NodeId::QuickMode => "quick_mode",
            NodeId::DeepResearch => "deep_research",
            NodeId::GapAnalysis => "gap_analysis",
            NodeId::Synthesize => "synthesize",
            NodeId::Formatter => "formatter",
            NodeId::ClarifyUser => "clarify_user",
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a transition leads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Node(NodeId),
    End,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Node(node) => node.fmt(f),
            Target::End => f.write_str("END"),
        }
    }
}

/// Thresholds the conditional edges compare against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutingPolicy {
    /// Minimum confidence for an intent to count as clear, and for research to count as sufficient
    pub confidence_threshold: f64,
    /// Maximum deep-research iterations per run
    pub max_iterations: u32,
    /// Also leave the research loop once the run's token budget is spent
    pub stop_on_budget: bool,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            max_iterations: 3,
            stop_on_budget: false,
        }
    }
}

/// Guard on a transition row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Always,
    /// Intent is clarified with enough confidence to plan
    IntentClear,
    ModeQuick,
    ModeDeep,
    /// Research is weak and the iteration cap allows another pass
    NeedsMoreResearch,
}

impl Condition {
    pub fn holds(&self, state: &AgentState, policy: &RoutingPolicy) -> bool {
        match self {
            Condition::Always => true,
            Condition::IntentClear => {
                state.is_clarified && state.intent_confidence >= policy.confidence_threshold
            }
            Condition::ModeQuick => state.mode == Some(Mode::Quick),
            Condition::ModeDeep => state.mode == Some(Mode::Deep),
            Condition::NeedsMoreResearch => {
                state.research_confidence_score < policy.confidence_threshold
                    && state.iterations < policy.max_iterations
                    && !(policy.stop_on_budget && state.budget_exhausted())
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Condition::Always => "always",
            Condition::IntentClear => "intent clear",
            Condition::ModeQuick => "mode == quick",
            Condition::ModeDeep => "mode == deep",
            Condition::NeedsMoreResearch => "needs more research",
        })
    }
}

/// One row of the table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub from: NodeId,
    pub when: Condition,
    pub to: Target,
}

impl Transition {
    const fn new(from: NodeId, when: Condition, to: Target) -> Self {
        Self { from, when, to }
    }
}

/// Ordered transition rows plus the policy their conditions read
#[derive(Debug, Clone)]
pub struct TransitionTable {
    rows: Vec<Transition>,
    policy: RoutingPolicy,
}

impl TransitionTable {
    /// The research workflow
    pub fn standard(policy: RoutingPolicy) -> Self {
        use Condition::*;
        use NodeId::*;

        let rows = vec![
            Transition::new(Guard, Always, Target::Node(Context)),
            Transition::new(Context, Always, Target::Node(IntentClassifier)),
            Transition::new(IntentClassifier, IntentClear, Target::Node(Planner)),
            Transition::new(IntentClassifier, Always, Target::Node(ClarifyUser)),
            Transition::new(ClarifyUser, Always, Target::End),
            Transition::new(Planner, ModeQuick, Target::Node(QuickMode)),
            Transition::new(Planner, ModeDeep, Target::Node(DeepResearch)),
            Transition::new(QuickMode, Always, Target::Node(Formatter)),
            Transition::new(DeepResearch, Always, Target::Node(GapAnalysis)),
            Transition::new(GapAnalysis, NeedsMoreResearch, Target::Node(DeepResearch)),
            Transition::new(GapAnalysis, Always, Target::Node(Synthesize)),
            Transition::new(Synthesize, Always, Target::Node(Formatter)),
            Transition::new(Formatter, Always, Target::End),
        ];

        Self { rows, policy }
    }

    /// Build a table from explicit rows
    pub fn from_rows(rows: Vec<Transition>, policy: RoutingPolicy) -> Self {
        Self { rows, policy }
    }

    /// The node every run starts at
    pub fn entry(&self) -> NodeId {
        NodeId::Guard
    }

    pub fn rows(&self) -> &[Transition] {
        &self.rows
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Every target reachable in one step from `from`, in row order
    pub fn successors(&self, from: NodeId) -> Vec<Target> {
        self.rows
            .iter()
            .filter(|row| row.from == from)
            .map(|row| row.to)
            .collect()
    }

    /// Pick the next step after `from` has run
    pub fn next(&self, from: NodeId, state: &AgentState) -> Result<Target> {
        self.rows
            .iter()
            .filter(|row| row.from == from)
            .find(|row| row.when.holds(state, &self.policy))
            .map(|row| row.to)
            .ok_or_else(|| {
                Error::StateMachine(format!(
                    "no transition from '{}' (mode: {:?}, iterations: {})",
                    from, state.mode, state.iterations
                ))
            })
    }
}

impl fmt::Display for TransitionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.rows {
            writeln!(f, "{:<18} {:<22} -> {}", row.from.name(), row.when, row.to)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TransitionTable {
        TransitionTable::standard(RoutingPolicy::default())
    }

    #[test]
    fn test_every_node_has_an_exit() {
        let table = table();
        for node in NodeId::ALL {
            assert!(
                !table.successors(node).is_empty(),
                "{} has no outgoing transition",
                node
            );
        }
    }

    #[test]
    fn test_clear_intent_routes_to_planner() {
        let mut state = AgentState::new("What is CFS?");
        state.is_clarified = true;
        state.intent_confidence = 0.9;
        assert_eq!(
            table().next(NodeId::IntentClassifier, &state).unwrap(),
            Target::Node(NodeId::Planner)
        );
    }

    #[test]
    fn test_unclear_intent_routes_to_clarification() {
        let mut state = AgentState::new("help");
        state.is_clarified = true;
        state.intent_confidence = 0.79;
        assert_eq!(
            table().next(NodeId::IntentClassifier, &state).unwrap(),
            Target::Node(NodeId::ClarifyUser)
        );

        state.intent_confidence = 0.95;
        state.is_clarified = false;
        assert_eq!(
            table().next(NodeId::IntentClassifier, &state).unwrap(),
            Target::Node(NodeId::ClarifyUser)
        );
    }

    #[test]
    fn test_intent_route_ignores_research_confidence() {
        let mut state = AgentState::new("q");
        state.is_clarified = true;
        state.intent_confidence = 0.9;
        state.research_confidence_score = 0.1;
        state.confidence_score = 0.1;
        assert_eq!(
            table().next(NodeId::IntentClassifier, &state).unwrap(),
            Target::Node(NodeId::Planner)
        );
    }

    #[test]
    fn test_gap_route_loops_until_cap() {
        let table = table();
        let mut state = AgentState::new("q");
        state.research_confidence_score = 0.4;

        for iterations in 0..3 {
            state.iterations = iterations;
            assert_eq!(
                table.next(NodeId::GapAnalysis, &state).unwrap(),
                Target::Node(NodeId::DeepResearch)
            );
        }
        state.iterations = 3;
        assert_eq!(
            table.next(NodeId::GapAnalysis, &state).unwrap(),
            Target::Node(NodeId::Synthesize)
        );
    }

    #[test]
    fn test_gap_route_exits_on_confidence() {
        let table = table();
        let mut state = AgentState::new("q");
        state.iterations = 1;
        state.research_confidence_score = 0.8;
        assert_eq!(
            table.next(NodeId::GapAnalysis, &state).unwrap(),
            Target::Node(NodeId::Synthesize)
        );
    }

    #[test]
    fn test_spent_budget_only_stops_loop_when_enabled() {
        let mut state = AgentState::new("q");
        state.iterations = 1;
        state.research_confidence_score = 0.2;
        state.token_usage = state.budget_limit * 2;
        assert_eq!(
            table().next(NodeId::GapAnalysis, &state).unwrap(),
            Target::Node(NodeId::DeepResearch)
        );

        let strict = TransitionTable::standard(RoutingPolicy {
            stop_on_budget: true,
            ..RoutingPolicy::default()
        });
        assert_eq!(
            strict.next(NodeId::GapAnalysis, &state).unwrap(),
            Target::Node(NodeId::Synthesize)
        );
    }

    #[test]
    fn test_planner_without_mode_is_fatal() {
        let state = AgentState::new("q");
        let err = table().next(NodeId::Planner, &state).unwrap_err();
        assert!(matches!(err, Error::StateMachine(_)));
    }

    #[test]
    fn test_terminal_nodes_end() {
        let state = AgentState::new("q");
        assert_eq!(table().next(NodeId::Formatter, &state).unwrap(), Target::End);
        assert_eq!(table().next(NodeId::ClarifyUser, &state).unwrap(), Target::End);
    }

    #[test]
    fn test_display_lists_rows() {
        let rendered = table().to_string();
        assert_eq!(rendered.lines().count(), 13);
        assert!(rendered.contains("gap_analysis"));
        assert!(rendered.contains("END"));
    }

    #[test]
    fn test_node_names_match_serde() {
        for node in NodeId::ALL {
            let json = serde_json::to_value(node).unwrap();
            assert_eq!(json, node.name());
        }
    }
}
