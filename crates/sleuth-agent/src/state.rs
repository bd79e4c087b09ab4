//! Workflow state and the reducers that merge node output into it

use serde::{Deserialize, Serialize};
use std::fmt;

/// Source label for answers produced from the model alone
pub const SOURCE_LLM: &str = "LLM Knowledge";
/// Source label for evidence gathered through web search
pub const SOURCE_WEB: &str = "Web Search";

/// Default per-query token budget
pub const DEFAULT_BUDGET_LIMIT: u64 = 5000;

/// Confidence used when a model reports nothing usable
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Category the intent classifier assigned to a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    BugFix,
    Architecture,
    Concept,
    Research,
    GeneralQuestion,
    NonTechnical,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Intent::BugFix => "Bug Fix",
            Intent::Architecture => "Architecture",
            Intent::Concept => "Concept",
            Intent::Research => "Research",
            Intent::GeneralQuestion => "General Question",
            Intent::NonTechnical => "Non-Technical",
        };
        f.write_str(label)
    }
}

/// How a query is being answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Quick,
    Deep,
    Clarification,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Quick => "quick",
            Mode::Deep => "deep",
            Mode::Clarification => "clarification",
        })
    }
}

/// Speaker of a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A piece of evidence gathered during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchRecord {
    pub content: String,
    pub source: String,
}

/// The record threaded through every node of a run.
///
/// Checkpoints serialize this struct whole; missing fields fall back to their
/// defaults so older snapshots stay loadable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentState {
    pub query: String,
    pub history: Vec<HistoryEntry>,
    pub context: Vec<String>,
    pub intent: Option<Intent>,
    pub is_clarified: bool,
    pub clarification_question: String,
    pub mode: Option<Mode>,
    pub confidence_score: f64,
    pub intent_confidence: f64,
    pub research_confidence_score: f64,
    pub research_data: Vec<ResearchRecord>,
    pub final_report: String,
    pub token_usage: u64,
    pub budget_limit: u64,
    pub gaps: Vec<String>,
    pub iterations: u32,
    pub query_id: String,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            query: String::new(),
            history: Vec::new(),
            context: Vec::new(),
            intent: None,
            is_clarified: false,
            clarification_question: String::new(),
            mode: None,
            confidence_score: 0.0,
            intent_confidence: 0.0,
            research_confidence_score: 0.0,
            research_data: Vec::new(),
            final_report: String::new(),
            token_usage: 0,
            budget_limit: DEFAULT_BUDGET_LIMIT,
            gaps: Vec::new(),
            iterations: 0,
            query_id: String::new(),
        }
    }
}

impl AgentState {
    /// Fresh state for a query
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// The last `n` history entries, oldest first
    pub fn recent_history(&self, n: usize) -> &[HistoryEntry] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    /// Whether the token budget for this run is spent
    pub fn budget_exhausted(&self) -> bool {
        self.token_usage >= self.budget_limit
    }

    /// Merge a node's partial update into the state.
    ///
    /// A run reset applies first. `history` and `research_data` append,
    /// `tokens` adds, `advance_iteration` bumps the loop counter, and every
    /// other present field replaces. Confidences are clamped on write.
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(reset) = update.reset {
            self.token_usage = 0;
            self.iterations = 0;
            self.research_data.clear();
            self.gaps.clear();
            self.clarification_question.clear();
            self.budget_limit = reset.budget_limit;
            self.query_id = reset.query_id;
        }

        self.history.extend(update.history);
        self.research_data.extend(update.research);
        self.token_usage = self.token_usage.saturating_add(update.tokens);
        if update.advance_iteration {
            self.iterations += 1;
        }

        if let Some(context) = update.context {
            self.context = context;
        }
        if let Some(intent) = update.intent {
            self.intent = Some(intent);
        }
        if let Some(is_clarified) = update.is_clarified {
            self.is_clarified = is_clarified;
        }
        if let Some(question) = update.clarification_question {
            self.clarification_question = question;
        }
        if let Some(mode) = update.mode {
            self.mode = Some(mode);
        }
        if let Some(score) = update.confidence_score {
            self.confidence_score = clamp_confidence(score);
        }
        if let Some(score) = update.intent_confidence {
            self.intent_confidence = clamp_confidence(score);
        }
        if let Some(score) = update.research_confidence_score {
            self.research_confidence_score = clamp_confidence(score);
        }
        if let Some(report) = update.final_report {
            self.final_report = report;
        }
        if let Some(gaps) = update.gaps {
            self.gaps = gaps;
        }
    }
}

/// Values the guard node resets at the start of every run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReset {
    pub budget_limit: u64,
    pub query_id: String,
}

/// Partial state produced by a node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub reset: Option<RunReset>,
    /// Appended to `history`
    pub history: Vec<HistoryEntry>,
    /// Appended to `research_data`
    pub research: Vec<ResearchRecord>,
    /// Added to `token_usage`
    pub tokens: u64,
    pub advance_iteration: bool,
    pub context: Option<Vec<String>>,
    pub intent: Option<Intent>,
    pub is_clarified: Option<bool>,
    pub clarification_question: Option<String>,
    pub mode: Option<Mode>,
    pub confidence_score: Option<f64>,
    pub intent_confidence: Option<f64>,
    pub research_confidence_score: Option<f64>,
    pub final_report: Option<String>,
    pub gaps: Option<Vec<String>>,
}

/// Clamp a confidence into [0, 1]; NaN becomes the default.
pub fn clamp_confidence(score: f64) -> f64 {
    if score.is_nan() {
        DEFAULT_CONFIDENCE
    } else {
        score.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_run_fields_and_keeps_history() {
        let mut state = AgentState::new("second question");
        state.history.push(HistoryEntry::user("first question"));
        state.token_usage = 900;
        state.iterations = 3;
        state.gaps = vec!["benchmarks".into()];
        state.research_data.push(ResearchRecord {
            content: "old".into(),
            source: SOURCE_WEB.into(),
        });
        state.clarification_question = "which language?".into();

        state.apply(StateUpdate {
            reset: Some(RunReset {
                budget_limit: 8000,
                query_id: "q-1".into(),
            }),
            history: vec![HistoryEntry::user("second question")],
            ..Default::default()
        });

        assert_eq!(state.token_usage, 0);
        assert_eq!(state.iterations, 0);
        assert!(state.gaps.is_empty());
        assert!(state.research_data.is_empty());
        assert!(state.clarification_question.is_empty());
        assert_eq!(state.budget_limit, 8000);
        assert_eq!(state.query_id, "q-1");
        assert_eq!(state.history.len(), 2);
    }

    #[test]
    fn test_additive_fields_accumulate() {
        let mut state = AgentState::new("q");
        for i in 0..3 {
            state.apply(StateUpdate {
                research: vec![ResearchRecord {
                    content: format!("finding {}", i),
                    source: SOURCE_WEB.into(),
                }],
                tokens: 100,
                advance_iteration: true,
                gaps: Some(vec![format!("gap {}", i)]),
                ..Default::default()
            });
        }
        assert_eq!(state.research_data.len(), 3);
        assert_eq!(state.token_usage, 300);
        assert_eq!(state.iterations, 3);
        assert_eq!(state.gaps, vec!["gap 2".to_string()]);
    }

    #[test]
    fn test_confidence_clamped_on_write() {
        let mut state = AgentState::new("q");
        state.apply(StateUpdate {
            confidence_score: Some(1.7),
            intent_confidence: Some(-0.2),
            research_confidence_score: Some(f64::NAN),
            ..Default::default()
        });
        assert_eq!(state.confidence_score, 1.0);
        assert_eq!(state.intent_confidence, 0.0);
        assert_eq!(state.research_confidence_score, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_recent_history_window() {
        let mut state = AgentState::new("q");
        assert!(state.recent_history(5).is_empty());
        for i in 0..7 {
            state.history.push(HistoryEntry::user(format!("m{}", i)));
        }
        let recent = state.recent_history(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "m4");
    }

    #[test]
    fn test_checkpoint_with_missing_fields_loads() {
        let json = serde_json::json!({
            "query": "what is CFS",
            "history": [{"role": "user", "content": "what is CFS"}],
            "mode": "deep"
        });
        let state: AgentState = serde_json::from_value(json).unwrap();
        assert_eq!(state.mode, Some(Mode::Deep));
        assert_eq!(state.budget_limit, DEFAULT_BUDGET_LIMIT);
        assert_eq!(state.history[0].role, Role::User);
    }

    #[test]
    fn test_display_labels() {
        assert_eq!(Intent::BugFix.to_string(), "Bug Fix");
        assert_eq!(Mode::Clarification.to_string(), "clarification");
    }
}
