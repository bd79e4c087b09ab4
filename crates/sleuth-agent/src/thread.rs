//! Conversation threads shown to the user

use serde::{Deserialize, Serialize};

use crate::{
    graph::NodeId,
    state::{Mode, Role},
};

const TITLE_CHARS: usize = 50;
const DEFAULT_TITLE: &str = "New Chat";

/// Truncate a string to `max` characters, appending "..." if truncated.
pub fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// A message in a thread, with run metadata on assistant replies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
    #[serde(default)]
    pub is_clarification: bool,
    #[serde(default)]
    pub nodes: Vec<NodeId>,
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub tokens: u64,
}

/// Metadata recorded with an assistant reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyMeta {
    pub nodes: Vec<NodeId>,
    pub mode: Option<Mode>,
    pub confidence: Option<f64>,
    pub tokens: u64,
}

/// A conversation thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub messages: Vec<ThreadMessage>,
    pub total_tokens: u64,
}

impl Thread {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: DEFAULT_TITLE.to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
            messages: Vec::new(),
            total_tokens: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// All threads of a session plus the one currently selected
#[derive(Debug, Clone)]
pub struct ThreadStore {
    threads: Vec<Thread>,
    current: usize,
}

impl ThreadStore {
    /// A store holding a single empty thread with the given id
    pub fn with_initial(id: impl Into<String>) -> Self {
        Self {
            threads: vec![Thread::new(id)],
            current: 0,
        }
    }

    /// Start a new thread and select it. Returns its id.
    pub fn create_thread(&mut self) -> String {
        let thread = Thread::new(uuid::Uuid::new_v4().to_string());
        let id = thread.id.clone();
        self.threads.push(thread);
        self.current = self.threads.len() - 1;
        id
    }

    pub fn current(&self) -> &Thread {
        &self.threads[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn list(&self) -> &[Thread] {
        &self.threads
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Select the thread at `index`. Returns false when out of range.
    pub fn switch(&mut self, index: usize) -> bool {
        if index < self.threads.len() {
            self.current = index;
            true
        } else {
            false
        }
    }

    /// Delete the thread at `index`, refusing to remove the last one.
    /// Returns the removed thread.
    pub fn delete(&mut self, index: usize) -> Option<Thread> {
        if self.threads.len() <= 1 || index >= self.threads.len() {
            return None;
        }
        let removed = self.threads.remove(index);
        if self.current > index || self.current >= self.threads.len() {
            self.current = self.current.saturating_sub(1);
        }
        Some(removed)
    }

    /// Record the user's query on the current thread, titling it on first use.
    pub fn append_user(&mut self, content: &str) {
        let thread = &mut self.threads[self.current];
        if thread.is_empty() {
            thread.title = truncate_chars(content.trim(), TITLE_CHARS);
        }
        thread.messages.push(ThreadMessage {
            role: Role::User,
            content: content.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            is_clarification: false,
            nodes: Vec::new(),
            mode: None,
            confidence: None,
            tokens: 0,
        });
    }

    /// Record an assistant reply on the current thread.
    pub fn append_assistant(&mut self, content: &str, meta: ReplyMeta) {
        let thread = &mut self.threads[self.current];
        thread.total_tokens += meta.tokens;
        thread.messages.push(ThreadMessage {
            role: Role::Assistant,
            content: content.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            is_clarification: meta.mode == Some(Mode::Clarification),
            nodes: meta.nodes,
            mode: meta.mode,
            confidence: meta.confidence,
            tokens: meta.tokens,
        });
    }

    /// Tokens used across every thread
    pub fn total_tokens(&self) -> u64 {
        self.threads.iter().map(|t| t.total_tokens).sum()
    }
}
