//! Nodes that run before planning: guard, context retrieval, intent

use sleuth_ai::{Context, Message};

use super::Services;
use crate::{
    assessment::IntentAssessment,
    prompts,
    state::{AgentState, HistoryEntry, RunReset, StateUpdate},
    workflow::WorkflowConfig,
};

/// Reset per-run fields, assign a query id, and record the user's turn.
pub(super) fn guard(state: &AgentState, config: &WorkflowConfig) -> StateUpdate {
    let query_id = uuid::Uuid::new_v4().to_string();
    tracing::debug!(query_id = %query_id, budget = config.budget_limit, "Starting run");
    StateUpdate {
        reset: Some(RunReset {
            budget_limit: config.budget_limit,
            query_id,
        }),
        history: vec![HistoryEntry::user(state.query.clone())],
        ..Default::default()
    }
}

pub(super) async fn retrieve_context(
    state: &AgentState,
    services: &Services,
    config: &WorkflowConfig,
) -> StateUpdate {
    let context = match services
        .memory
        .get_context(&state.query, config.context_results)
        .await
    {
        Ok(snippets) => snippets,
        Err(e) => {
            tracing::warn!("Context retrieval failed, continuing without: {}", e);
            Vec::new()
        }
    };
    tracing::debug!(snippets = context.len(), "Retrieved context");
    StateUpdate {
        context: Some(context),
        ..Default::default()
    }
}

pub(super) async fn classify_intent(
    state: &AgentState,
    services: &Services,
    config: &WorkflowConfig,
) -> StateUpdate {
    let ctx = Context::with_system(prompts::INTENT_SYSTEM).with_message(Message::user(
        prompts::intent_user(&state.query, state.recent_history(5)),
    ));

    let (assessment, tokens) = match services.inference.invoke(&ctx).await {
        Ok(completion) => (IntentAssessment::parse(&completion.text), completion.token_count),
        Err(e) => {
            if e.is_unreachable() {
                tracing::warn!("Model endpoint unreachable during intent classification: {}", e);
            } else {
                tracing::warn!("Intent classification failed: {}", e);
            }
            (IntentAssessment::Default, 0)
        }
    };

    let decision = assessment.decide(config.policy.confidence_threshold);
    tracing::info!(
        intent = %decision.intent,
        confidence = decision.confidence,
        clarified = decision.is_clarified,
        parse = assessment.kind(),
        "Classified intent"
    );

    StateUpdate {
        tokens,
        intent: Some(decision.intent),
        intent_confidence: Some(decision.confidence),
        confidence_score: Some(decision.confidence),
        is_clarified: Some(decision.is_clarified),
        clarification_question: Some(decision.clarification_question),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::DEFAULT_CLARIFICATION;
    use crate::state::{Intent, Role};
    use crate::testing::{ScriptedInference, services_with};
    use std::sync::Arc;

    #[test]
    fn test_guard_resets_and_records_turn() {
        let mut state = AgentState::new("What is CFS?");
        state.token_usage = 77;
        let config = WorkflowConfig::default();

        let update = guard(&state, &config);
        let reset = update.reset.clone().unwrap();
        assert_eq!(reset.budget_limit, 5000);
        assert!(uuid::Uuid::parse_str(&reset.query_id).is_ok());

        state.apply(update);
        assert_eq!(state.token_usage, 0);
        assert_eq!(state.history.last().unwrap().role, Role::User);
        assert_eq!(state.history.last().unwrap().content, "What is CFS?");
    }

    #[test]
    fn test_guard_query_ids_are_fresh() {
        let state = AgentState::new("q");
        let config = WorkflowConfig::default();
        let a = guard(&state, &config).reset.unwrap().query_id;
        let b = guard(&state, &config).reset.unwrap().query_id;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_intent_failure_degrades_to_clarification() {
        let services = services_with(Arc::new(ScriptedInference::new()));
        let state = AgentState::new("help");
        let update = classify_intent(&state, &services, &WorkflowConfig::default()).await;

        assert_eq!(update.is_clarified, Some(false));
        assert_eq!(update.intent_confidence, Some(0.5));
        assert_eq!(update.intent, Some(Intent::Research));
        assert_eq!(update.clarification_question.as_deref(), Some(DEFAULT_CLARIFICATION));
        assert_eq!(update.tokens, 0);
    }

    #[tokio::test]
    async fn test_intent_structured_reply() {
        let inference = ScriptedInference::new().reply(
            prompts::INTENT_SYSTEM,
            r#"{"category": "CONCEPT", "confidence_score": 0.95, "is_clear": true, "clarification_question": ""}"#,
        );
        let services = services_with(Arc::new(inference));
        let update = classify_intent(
            &AgentState::new("What is CFS?"),
            &services,
            &WorkflowConfig::default(),
        )
        .await;

        assert_eq!(update.intent, Some(Intent::Concept));
        assert_eq!(update.is_clarified, Some(true));
        assert_eq!(update.intent_confidence, Some(0.95));
        assert!(update.tokens > 0);
    }

    #[tokio::test]
    async fn test_context_failure_is_empty() {
        let mut services = services_with(Arc::new(ScriptedInference::new()));
        services.memory = Arc::new(crate::testing::FailingMemory);
        let update = retrieve_context(&AgentState::new("q"), &services, &WorkflowConfig::default()).await;
        assert_eq!(update.context, Some(vec![]));
    }
}
