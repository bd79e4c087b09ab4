//! Parsing of the structured verdicts models return for intent and gap analysis
//!
//! Models are asked for a JSON object but do not always comply. Each parse
//! yields a tagged result recording how much of the output could be trusted:
//! a schema-valid JSON object, a regex salvage, or nothing at all.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;

use crate::state::{DEFAULT_CONFIDENCE, Intent, clamp_confidence};

/// Question asked when the classifier flags a query as unclear without supplying one
pub const DEFAULT_CLARIFICATION: &str = "Could you please provide more context about your query?";

/// Sentinel the classifier uses in place of a question for off-topic queries
pub const NON_TECHNICAL_SENTINEL: &str = "NON_TECHNICAL";

/// Gaps kept from a heuristic parse
const MAX_HEURISTIC_GAPS: usize = 5;

static JSON_SPAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

static CONFIDENCE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[Cc]onfidence[:\s]+([0-9.]+)").unwrap());

static GAPS_LABEL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[Gg]aps?:").unwrap());

static GAP_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[,\n]").unwrap());

static INTENT_SCHEMA: LazyLock<Option<jsonschema::Validator>> = LazyLock::new(|| {
    compile_schema(serde_json::json!({
        "type": "object",
        "properties": {
            "category": { "type": "string" },
            "confidence_score": { "type": "number" },
            "is_clear": { "type": ["boolean", "null"] },
            "clarification_question": { "type": ["string", "null"] }
        },
        "required": ["confidence_score"]
    }))
});

static GAP_SCHEMA: LazyLock<Option<jsonschema::Validator>> = LazyLock::new(|| {
    compile_schema(serde_json::json!({
        "type": "object",
        "properties": {
            "confidence_score": { "type": "number" },
            "gaps": { "type": "array" },
            "contradictions": { "type": "array" }
        },
        "required": ["confidence_score"]
    }))
});

fn compile_schema(schema: Value) -> Option<jsonschema::Validator> {
    match jsonschema::validator_for(&schema) {
        Ok(validator) => Some(validator),
        Err(e) => {
            tracing::warn!("Invalid assessment schema, structured parsing disabled: {}", e);
            None
        }
    }
}

/// Extract the first `{...}` span and accept it only if it matches `schema`.
fn structured_json(raw: &str, schema: &Option<jsonschema::Validator>) -> Option<Value> {
    let span = JSON_SPAN.find(raw)?;
    let value: Value = serde_json::from_str(span.as_str()).ok()?;
    let validator = schema.as_ref()?;
    if let Some(error) = validator.iter_errors(&value).next() {
        tracing::debug!("Structured output rejected: {}", error);
        return None;
    }
    Some(value)
}

fn heuristic_confidence(raw: &str) -> Option<f64> {
    let caps = CONFIDENCE_PATTERN.captures(raw)?;
    caps.get(1)?
        .as_str()
        .trim_end_matches('.')
        .parse::<f64>()
        .ok()
}

/// Map a classifier category to an intent; unknown labels count as research.
pub fn intent_from_category(category: &str) -> Intent {
    match category.trim().to_uppercase().as_str() {
        "BUG" => Intent::BugFix,
        "ARCHITECTURE" => Intent::Architecture,
        "CONCEPT" => Intent::Concept,
        "COMPARISON" | "RESEARCH" => Intent::Research,
        "GENERAL" => Intent::GeneralQuestion,
        "NON_TECHNICAL" => Intent::NonTechnical,
        _ => Intent::Research,
    }
}

/// The fields a schema-valid intent verdict may carry
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IntentVerdict {
    #[serde(default)]
    pub category: Option<String>,
    pub confidence_score: f64,
    #[serde(default)]
    pub is_clear: Option<bool>,
    #[serde(default)]
    pub clarification_question: Option<String>,
}

/// How the intent classifier's output was understood
#[derive(Debug, Clone, PartialEq)]
pub enum IntentAssessment {
    Structured(IntentVerdict),
    Heuristic { confidence: f64 },
    Default,
}

/// What the workflow does with an intent assessment
#[derive(Debug, Clone, PartialEq)]
pub struct IntentDecision {
    pub intent: Intent,
    pub confidence: f64,
    pub is_clarified: bool,
    pub clarification_question: String,
}

impl IntentAssessment {
    pub fn parse(raw: &str) -> Self {
        if let Some(value) = structured_json(raw, &INTENT_SCHEMA) {
            if let Ok(verdict) = serde_json::from_value::<IntentVerdict>(value) {
                return IntentAssessment::Structured(verdict);
            }
        }
        match heuristic_confidence(raw) {
            Some(confidence) => IntentAssessment::Heuristic { confidence },
            None => IntentAssessment::Default,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IntentAssessment::Structured(_) => "structured",
            IntentAssessment::Heuristic { .. } => "heuristic",
            IntentAssessment::Default => "default",
        }
    }

    /// Resolve into routing fields. A missing `is_clear` falls back to the threshold.
    pub fn decide(&self, threshold: f64) -> IntentDecision {
        let (intent, confidence, is_clarified, question) = match self {
            IntentAssessment::Structured(verdict) => {
                let confidence = clamp_confidence(verdict.confidence_score);
                (
                    verdict
                        .category
                        .as_deref()
                        .map(intent_from_category)
                        .unwrap_or(Intent::Research),
                    confidence,
                    verdict.is_clear.unwrap_or(confidence >= threshold),
                    verdict
                        .clarification_question
                        .as_deref()
                        .map(str::trim)
                        .unwrap_or_default()
                        .to_string(),
                )
            }
            IntentAssessment::Heuristic { confidence } => {
                let confidence = clamp_confidence(*confidence);
                (Intent::Research, confidence, confidence >= threshold, String::new())
            }
            IntentAssessment::Default => (Intent::Research, DEFAULT_CONFIDENCE, false, String::new()),
        };

        // A clear-but-unconfident verdict still routes to clarification, so it needs a question too
        let routes_to_clarification = !is_clarified || confidence < threshold;
        let clarification_question = if routes_to_clarification && question.is_empty() {
            DEFAULT_CLARIFICATION.to_string()
        } else {
            question
        };

        IntentDecision {
            intent,
            confidence,
            is_clarified,
            clarification_question,
        }
    }
}

/// How the gap analyser's output was understood
#[derive(Debug, Clone, PartialEq)]
pub enum GapAssessment {
    Structured { confidence: f64, gaps: Vec<String> },
    Heuristic { confidence: f64, gaps: Vec<String> },
    Default,
}

impl GapAssessment {
    pub fn parse(raw: &str) -> Self {
        if let Some(value) = structured_json(raw, &GAP_SCHEMA) {
            let confidence = value["confidence_score"].as_f64().unwrap_or(DEFAULT_CONFIDENCE);
            let gaps = value["gaps"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .map(|g| match g {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            return GapAssessment::Structured {
                confidence: clamp_confidence(confidence),
                gaps,
            };
        }

        let confidence = heuristic_confidence(raw);
        let gaps = heuristic_gaps(raw);
        if confidence.is_none() && gaps.is_empty() {
            return GapAssessment::Default;
        }
        GapAssessment::Heuristic {
            confidence: clamp_confidence(confidence.unwrap_or(DEFAULT_CONFIDENCE)),
            gaps,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GapAssessment::Structured { .. } => "structured",
            GapAssessment::Heuristic { .. } => "heuristic",
            GapAssessment::Default => "default",
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            GapAssessment::Structured { confidence, .. }
            | GapAssessment::Heuristic { confidence, .. } => *confidence,
            GapAssessment::Default => DEFAULT_CONFIDENCE,
        }
    }

    pub fn gaps(&self) -> &[String] {
        match self {
            GapAssessment::Structured { gaps, .. } | GapAssessment::Heuristic { gaps, .. } => gaps,
            GapAssessment::Default => &[],
        }
    }
}

/// Gaps listed after the last `gaps:` label, split on commas and newlines.
fn heuristic_gaps(raw: &str) -> Vec<String> {
    if !raw.to_lowercase().contains("gaps") {
        return Vec::new();
    }
    let tail = GAPS_LABEL.split(raw).last().unwrap_or_default().trim();
    GAP_SEPARATOR
        .split(tail)
        .map(|g| g.trim().trim_matches(|c| c == '"' || c == '-').trim())
        .filter(|g| !g.is_empty())
        .take(MAX_HEURISTIC_GAPS)
        .map(str::to_string)
        .collect()
}
