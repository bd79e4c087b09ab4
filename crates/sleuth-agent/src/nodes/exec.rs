//! Nodes that produce the answer: planner, quick mode, the research loop, synthesis

use futures::StreamExt;
use regex::Regex;
use sleuth_ai::{Context, Message};
use std::sync::{Arc, LazyLock};

use super::{Services, clip};
use crate::{
    assessment::GapAssessment,
    error::Error,
    inference::estimate_tokens,
    prompts,
    state::{
        AgentState, DEFAULT_CONFIDENCE, HistoryEntry, Mode, ResearchRecord, Role, SOURCE_LLM,
        SOURCE_WEB, StateUpdate,
    },
    streaming::StreamingBuffer,
};

const QUICK_CONFIDENCE: f64 = 0.9;
const GAP_RESEARCH_CHARS: usize = 5000;
const GAP_HISTORY_CHARS: usize = 100;
const SYNTHESIS_CONTEXT_CHARS: usize = 9000;
const URLS_PER_SOURCE: usize = 5;
const MAX_URLS: usize = 20;

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s\)\]"'<>]+"#).unwrap());

/// Text produced by a streamed call, plus the error that cut it short
struct Streamed {
    text: String,
    error: Option<Error>,
}

/// Stream a response into the run's buffer. The buffer is always marked
/// complete, whether the stream ends normally or fails.
async fn stream_to_buffer(services: &Services, state: &AgentState, ctx: &Context) -> Streamed {
    let buffer: Option<Arc<StreamingBuffer>> = (!state.query_id.is_empty())
        .then(|| services.buffers.get_or_create(&state.query_id));

    let mut text = String::new();
    let mut error = None;

    match services.inference.stream(ctx).await {
        Ok(mut tokens) => {
            while let Some(item) = tokens.next().await {
                match item {
                    Ok(token) => {
                        text.push_str(&token);
                        if let Some(ref buffer) = buffer {
                            buffer.push(token);
                        }
                    }
                    Err(e) => {
                        error = Some(e);
                        break;
                    }
                }
            }
        }
        Err(e) => error = Some(e),
    }

    if let Some(ref buffer) = buffer {
        buffer.mark_complete();
    }
    Streamed { text, error }
}

fn to_message(entry: &HistoryEntry) -> Message {
    match entry.role {
        Role::User => Message::user(entry.content.clone()),
        Role::Assistant => Message::assistant(entry.content.clone()),
    }
}

pub(super) async fn plan(state: &AgentState, services: &Services) -> StateUpdate {
    let ctx = Context::with_system(prompts::PLANNER_SYSTEM).with_message(Message::user(
        prompts::planner_user(&state.query, state.recent_history(4)),
    ));

    let (mode, tokens) = match services.inference.invoke(&ctx).await {
        Ok(completion) => {
            let mode = if completion.text.to_lowercase().contains("deep") {
                Mode::Deep
            } else {
                Mode::Quick
            };
            (mode, completion.token_count)
        }
        Err(e) => {
            tracing::warn!("Planner failed, answering in quick mode: {}", e);
            (Mode::Quick, 0)
        }
    };

    tracing::info!(mode = %mode, "Planned");
    StateUpdate {
        mode: Some(mode),
        tokens,
        ..Default::default()
    }
}

pub(super) async fn quick_answer(state: &AgentState, services: &Services) -> StateUpdate {
    let mut system = prompts::QUICK_SYSTEM.to_string();
    if !state.context.is_empty() {
        system.push_str("\n\nNotes from earlier sessions:\n");
        system.push_str(&state.context.join("\n"));
    }

    let mut ctx = Context::with_system(system);
    for entry in state.recent_history(6) {
        ctx.push(to_message(entry));
    }
    let query_is_last = matches!(
        ctx.messages.last(),
        Some(Message::User { content, .. }) if *content == state.query
    );
    if !query_is_last {
        ctx.push(Message::user(state.query.clone()));
    }

    let streamed = stream_to_buffer(services, state, &ctx).await;
    let tokens = estimate_tokens(&streamed.text);

    let (report, confidence) = match streamed.error {
        None => (streamed.text, QUICK_CONFIDENCE),
        Some(e) => {
            tracing::warn!("Quick answer interrupted: {}", e);
            let report = if streamed.text.is_empty() {
                format!("Unable to generate an answer: {}", e)
            } else {
                format!("{}\n\n_(Response interrupted: {})_", streamed.text, e)
            };
            (report, DEFAULT_CONFIDENCE)
        }
    };

    StateUpdate {
        research: vec![ResearchRecord {
            content: report.clone(),
            source: SOURCE_LLM.to_string(),
        }],
        final_report: Some(report),
        confidence_score: Some(confidence),
        tokens,
        ..Default::default()
    }
}

/// Search query for the next research pass
pub(crate) fn build_search_query(state: &AgentState) -> String {
    if !state.gaps.is_empty() {
        let focus: Vec<&str> = state.gaps.iter().take(3).map(String::as_str).collect();
        return format!("{} focusing on: {}", state.query, focus.join(", "));
    }

    let earlier: Vec<&str> = state
        .recent_history(2)
        .iter()
        .filter(|e| e.role == Role::User && e.content != state.query)
        .map(|e| e.content.as_str())
        .collect();
    if earlier.is_empty() {
        state.query.clone()
    } else {
        format!("{} (context: {})", state.query, earlier.join("; "))
    }
}

pub(super) async fn deep_research(state: &AgentState, services: &Services) -> StateUpdate {
    let search_query = build_search_query(state);
    tracing::info!(iteration = state.iterations + 1, query = %search_query, "Researching");

    let content = services.search.search(&search_query).await.render();

    StateUpdate {
        research: vec![ResearchRecord {
            content,
            source: SOURCE_WEB.to_string(),
        }],
        advance_iteration: true,
        ..Default::default()
    }
}

pub(super) async fn analyze_gaps(state: &AgentState, services: &Services) -> StateUpdate {
    let combined: Vec<&str> = state.research_data.iter().map(|r| r.content.as_str()).collect();
    let combined = combined.join("\n");

    let mut query = state.query.clone();
    let recent = state.recent_history(3);
    if !recent.is_empty() {
        let turns: Vec<String> = recent
            .iter()
            .map(|e| format!("{}: {}", e.role.as_str(), clip(&e.content, GAP_HISTORY_CHARS)))
            .collect();
        query.push_str("\nConversation context: ");
        query.push_str(&turns.join("; "));
    }

    let ctx = Context::with_system(prompts::GAP_SYSTEM).with_message(Message::user(prompts::gap_user(
        &query,
        clip(&combined, GAP_RESEARCH_CHARS),
    )));

    let (assessment, tokens) = match services.inference.invoke(&ctx).await {
        Ok(completion) => (GapAssessment::parse(&completion.text), completion.token_count),
        Err(e) => {
            tracing::warn!("Gap analysis failed: {}", e);
            (GapAssessment::Default, 0)
        }
    };

    tracing::info!(
        iteration = state.iterations,
        confidence = assessment.confidence(),
        gaps = assessment.gaps().len(),
        parse = assessment.kind(),
        "Analyzed research gaps"
    );

    StateUpdate {
        research_confidence_score: Some(assessment.confidence()),
        confidence_score: Some(assessment.confidence()),
        gaps: Some(assessment.gaps().to_vec()),
        tokens,
        ..Default::default()
    }
}

/// URLs found in the research, at most five per record and twenty overall, first-seen order
pub(crate) fn evidence_urls(research: &[ResearchRecord]) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for record in research {
        for m in URL_PATTERN.find_iter(&record.content).take(URLS_PER_SOURCE) {
            if !urls.iter().any(|u| u == m.as_str()) {
                urls.push(m.as_str().to_string());
            }
        }
    }
    urls.truncate(MAX_URLS);
    urls
}

/// Research blocks joined for the synthesizer, followed by the evidence URL list
pub(crate) fn synthesis_context(research: &[ResearchRecord]) -> String {
    let mut combined = research
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[Source {}: {}]\n{}", i + 1, r.source, r.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    let urls = evidence_urls(research);
    if !urls.is_empty() {
        combined.push_str("\n\nAVAILABLE URLS FOR EVIDENCE TRACE (use these verbatim in your links):\n");
        combined.push_str(
            &urls
                .iter()
                .map(|u| format!("- {}", u))
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }
    combined
}

fn degraded_report(context: &str, error: &Error) -> String {
    format!(
        "# Research Notes\n\nThe report could not be synthesized ({}). The raw findings follow.\n\n{}",
        error, context
    )
}

pub(super) async fn synthesize(state: &AgentState, services: &Services) -> StateUpdate {
    let context = synthesis_context(&state.research_data);
    let context = clip(&context, SYNTHESIS_CONTEXT_CHARS);

    let mut query = state.query.clone();
    let recent = state.recent_history(4);
    if !recent.is_empty() {
        query.push_str("\n\nConversation context:\n");
        query.push_str(&prompts::history_lines(recent));
    }

    let ctx = Context::with_system(prompts::SYNTHESIS_SYSTEM)
        .with_message(Message::user(prompts::synthesis_user(&query, context)));

    let streamed = stream_to_buffer(services, state, &ctx).await;
    let tokens = estimate_tokens(&streamed.text);

    let report = match streamed.error {
        None => streamed.text.trim().to_string(),
        Some(e) => {
            tracing::warn!("Synthesis failed, returning raw findings: {}", e);
            if streamed.text.trim().is_empty() {
                degraded_report(context, &e)
            } else {
                format!("{}\n\n_(Report interrupted: {})_", streamed.text.trim(), e)
            }
        }
    };

    StateUpdate {
        final_report: Some(report),
        tokens,
        ..Default::default()
    }
}
