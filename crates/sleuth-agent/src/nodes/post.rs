//! Nodes that finish a run: formatting and clarification

use sleuth_ai::{Context, Message};

use super::{Services, clip};
use crate::{
    assessment::NON_TECHNICAL_SENTINEL,
    memory::MemoryMetadata,
    prompts,
    state::{AgentState, HistoryEntry, Mode, SOURCE_LLM, StateUpdate},
};

const MEMORY_RESPONSE_CHARS: usize = 2000;

/// `1234567` -> `1,234,567`
pub(crate) fn with_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Distinct research sources in first-seen order
fn distinct_sources(state: &AgentState) -> Vec<&str> {
    let mut sources: Vec<&str> = Vec::new();
    for record in &state.research_data {
        if !sources.contains(&record.source.as_str()) {
            sources.push(&record.source);
        }
    }
    sources
}

/// Wrap a report with the sources/confidence/mode/usage footer
pub(crate) fn render_report(state: &AgentState) -> String {
    let report = if state.final_report.is_empty() {
        "No report generated."
    } else {
        state.final_report.as_str()
    };

    let sources = distinct_sources(state);
    let sources = if sources.is_empty() {
        SOURCE_LLM.to_string()
    } else {
        sources.join(", ")
    };
    let mode = state
        .mode
        .map(|m| m.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    format!(
        "{}\n\n---\n> **Sources:** {}\n> **Confidence:** {:.2}\n> **Mode:** {}\n> **Token Usage:** {} tokens\n",
        report,
        sources,
        state.confidence_score,
        mode,
        with_thousands(state.token_usage)
    )
}

pub(super) async fn format_output(state: &AgentState, services: &Services) -> StateUpdate {
    let formatted = render_report(state);

    let metadata = MemoryMetadata {
        intent_confidence: state.intent_confidence,
        research_confidence: state.research_confidence_score,
        mode: state.mode.map(|m| m.to_string()).unwrap_or_default(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    let remembered = format!(
        "Query: {}\nResponse: {}",
        state.query,
        clip(&state.final_report, MEMORY_RESPONSE_CHARS)
    );
    if let Err(e) = services.memory.add(&remembered, metadata).await {
        tracing::warn!("Memory save failed: {}", e);
    }

    match services.reports.write(&formatted).await {
        Ok(location) => tracing::info!(location = %location, "Report saved"),
        Err(e) => tracing::warn!("Report save failed: {}", e),
    }

    StateUpdate {
        final_report: Some(formatted.clone()),
        history: vec![HistoryEntry::assistant(formatted)],
        ..Default::default()
    }
}

fn fallback_clarification(question: &str) -> String {
    if question == NON_TECHNICAL_SENTINEL {
        "I focus on software and technology questions, so I can't help with that one. \
         Try asking about a language, framework, tool, or system design problem."
            .to_string()
    } else {
        format!("I need a bit more context before researching this. {}", question)
    }
}

pub(super) async fn clarify_user(state: &AgentState, services: &Services) -> StateUpdate {
    let question = state.clarification_question.as_str();
    let ctx = Context::with_system(prompts::CLARIFY_SYSTEM)
        .with_message(Message::user(prompts::clarify_user(&state.query, question)));

    let (reply, tokens) = match services.inference.invoke(&ctx).await {
        Ok(completion) if !completion.text.trim().is_empty() => {
            (completion.text.trim().to_string(), completion.token_count)
        }
        Ok(completion) => (fallback_clarification(question), completion.token_count),
        Err(e) => {
            tracing::warn!("Clarification response failed, using fallback: {}", e);
            (fallback_clarification(question), 0)
        }
    };

    StateUpdate {
        mode: Some(Mode::Clarification),
        is_clarified: Some(false),
        final_report: Some(reply.clone()),
        history: vec![HistoryEntry::assistant(reply)],
        tokens,
        ..Default::default()
    }
}
