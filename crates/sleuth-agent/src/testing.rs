//! Scripted collaborators for unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use sleuth_ai::Context;
use std::sync::Arc;

use crate::{
    artifact::ReportSink,
    checkpoint::CheckpointStore,
    error::{Error, Result},
    inference::{Completion, Inference, TokenStream, estimate_tokens},
    memory::{InMemoryMemory, Memory, MemoryMetadata},
    nodes::Services,
    search::{Search, SearchOutcome},
    state::AgentState,
    streaming::BufferRegistry,
};

#[derive(Debug, Clone)]
enum Script {
    Reply(String),
    Stream(Vec<String>),
    StreamFailure(Vec<String>, String),
}

impl Script {
    fn text(&self) -> String {
        match self {
            Script::Reply(text) => text.clone(),
            Script::Stream(tokens) | Script::StreamFailure(tokens, _) => tokens.concat(),
        }
    }
}

/// Inference keyed by system prompt prefix.
///
/// Calls whose system prompt matches no script fail with an inference error.
#[derive(Default)]
pub struct ScriptedInference {
    scripts: Vec<(String, Script)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedInference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, prefix: &str, text: &str) -> Self {
        self.scripts
            .push((prefix.to_string(), Script::Reply(text.to_string())));
        self
    }

    pub fn stream(mut self, prefix: &str, tokens: &[&str]) -> Self {
        let tokens = tokens.iter().map(|t| t.to_string()).collect();
        self.scripts.push((prefix.to_string(), Script::Stream(tokens)));
        self
    }

    pub fn stream_failure(mut self, prefix: &str, tokens: &[&str], error: &str) -> Self {
        let tokens = tokens.iter().map(|t| t.to_string()).collect();
        self.scripts.push((
            prefix.to_string(),
            Script::StreamFailure(tokens, error.to_string()),
        ));
        self
    }

    /// How many calls were made with a system prompt starting with `prefix`
    pub fn calls(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|system| system.starts_with(prefix))
            .count()
    }

    fn script_for(&self, context: &Context) -> Result<Script> {
        let system = context.system_prompt.clone().unwrap_or_default();
        self.calls.lock().push(system.clone());
        self.scripts
            .iter()
            .filter(|(prefix, _)| system.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, script)| script.clone())
            .ok_or_else(|| Error::Inference("no scripted response".to_string()))
    }
}

#[async_trait]
impl Inference for ScriptedInference {
    async fn invoke(&self, context: &Context) -> Result<Completion> {
        let script = self.script_for(context)?;
        if let Script::StreamFailure(_, error) = script {
            return Err(Error::Inference(error));
        }
        let text = script.text();
        Ok(Completion {
            token_count: estimate_tokens(&text),
            text,
        })
    }

    async fn stream(&self, context: &Context) -> Result<TokenStream> {
        let items: Vec<Result<String>> = match self.script_for(context)? {
            Script::Reply(text) => vec![Ok(text)],
            Script::Stream(tokens) => tokens.into_iter().map(Ok).collect(),
            Script::StreamFailure(tokens, error) => tokens
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(Error::Inference(error))))
                .collect(),
        };
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

/// Search that records queries and answers with fixed raw text
pub struct RecordingSearch {
    text: String,
    queries: Mutex<Vec<String>>,
}

impl RecordingSearch {
    pub fn raw(text: &str) -> Self {
        Self {
            text: text.to_string(),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl Search for RecordingSearch {
    async fn search(&self, query: &str) -> SearchOutcome {
        self.queries.lock().push(query.to_string());
        SearchOutcome::Raw(self.text.clone())
    }
}

pub struct PanickingSearch;

#[async_trait]
impl Search for PanickingSearch {
    async fn search(&self, _query: &str) -> SearchOutcome {
        panic!("search backend exploded");
    }
}

pub struct FailingMemory;

#[async_trait]
impl Memory for FailingMemory {
    async fn add(&self, _text: &str, _metadata: MemoryMetadata) -> Result<()> {
        Err(Error::Memory("store offline".to_string()))
    }

    async fn get_context(&self, _query: &str, _n: usize) -> Result<Vec<String>> {
        Err(Error::Memory("store offline".to_string()))
    }
}

pub struct FailingCheckpoints;

#[async_trait]
impl CheckpointStore for FailingCheckpoints {
    async fn load(&self, _session: &str) -> Result<Option<AgentState>> {
        Err(Error::Checkpoint("disk unavailable".to_string()))
    }

    async fn save(&self, _session: &str, _state: &AgentState) -> Result<()> {
        Err(Error::Checkpoint("disk unavailable".to_string()))
    }

    async fn delete(&self, _session: &str) -> Result<()> {
        Err(Error::Checkpoint("disk unavailable".to_string()))
    }
}

#[derive(Default)]
pub struct RecordingReports {
    reports: Mutex<Vec<String>>,
}

impl RecordingReports {
    pub fn reports(&self) -> Vec<String> {
        self.reports.lock().clone()
    }
}

#[async_trait]
impl ReportSink for RecordingReports {
    async fn write(&self, report: &str) -> Result<String> {
        let mut reports = self.reports.lock();
        reports.push(report.to_string());
        Ok(format!("memory://report/{}", reports.len()))
    }
}

/// Services around `inference` with in-process collaborators
pub fn services_with(inference: Arc<dyn Inference>) -> Services {
    Services {
        inference,
        search: Arc::new(RecordingSearch::raw("**Result**\nsearch findings\nSource: https://example.dev/doc\n")),
        memory: Arc::new(InMemoryMemory::new()),
        reports: Arc::new(RecordingReports::default()),
        buffers: BufferRegistry::new(),
    }
}
