//! Progress record shared between a background run and its observer.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use crate::{graph::NodeId, state::AgentState};

/// A failure captured from a background run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// One-line description
    pub message: String,
    /// Source chain, plus a backtrace when `RUST_BACKTRACE` enables one
    pub detail: String,
}

impl RunFailure {
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut detail = String::new();
        let mut source = error.source();
        while let Some(cause) = source {
            detail.push_str(&format!("caused by: {}\n", cause));
            source = cause.source();
        }

        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            detail.push_str(&format!("backtrace:\n{}", backtrace));
        }

        Self {
            message: error.to_string(),
            detail: detail.trim_end().to_string(),
        }
    }

    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self {
            message: format!("run panicked: {}", message),
            detail: String::new(),
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}\n{}", self.message, self.detail)
        }
    }
}

/// Cloneable progress record for one run.
///
/// All fields are `Arc`-wrapped, so cloning is cheap. The worker records
/// node names and its outcome before setting the completion flag, so an
/// observer that sees `is_complete()` also sees everything recorded before it.
#[derive(Clone, Default)]
pub struct RunProgress {
    nodes: Arc<Mutex<Vec<NodeId>>>,
    query_id: Arc<Mutex<Option<String>>>,
    error: Arc<Mutex<Option<RunFailure>>>,
    final_state: Arc<Mutex<Option<AgentState>>>,
    complete: Arc<AtomicBool>,
    done_notify: Arc<tokio::sync::Notify>,
}

impl RunProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_node(&self, node: NodeId) {
        self.nodes.lock().push(node);
    }

    pub(crate) fn set_query_id(&self, query_id: &str) {
        *self.query_id.lock() = Some(query_id.to_string());
    }

    /// Record a successful outcome and signal completion.
    pub(crate) fn finish(&self, state: AgentState) {
        *self.final_state.lock() = Some(state);
        self.mark_complete();
    }

    /// Record a failure and signal completion.
    pub(crate) fn fail(&self, failure: RunFailure) {
        *self.error.lock() = Some(failure);
        self.mark_complete();
    }

    fn mark_complete(&self) {
        self.complete.store(true, Ordering::Release);
        self.done_notify.notify_waiters();
    }

    /// Executed nodes, in order
    pub fn nodes(&self) -> Vec<NodeId> {
        self.nodes.lock().clone()
    }

    /// Nodes executed since `cursor` were recorded
    pub fn nodes_since(&self, cursor: usize) -> Vec<NodeId> {
        let nodes = self.nodes.lock();
        nodes.get(cursor..).map(<[NodeId]>::to_vec).unwrap_or_default()
    }

    /// The run's query id, once the guard node has assigned it
    pub fn query_id(&self) -> Option<String> {
        self.query_id.lock().clone()
    }

    pub fn error(&self) -> Option<RunFailure> {
        self.error.lock().clone()
    }

    pub fn take_final_state(&self) -> Option<AgentState> {
        self.final_state.lock().take()
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Wait until the run completes, with a timeout.
    /// Returns `true` if completion was reached, `false` on timeout.
    pub async fn wait_complete_timeout(&self, timeout: Duration) -> bool {
        let notified = self.done_notify.notified();
        if self.is_complete() {
            return true;
        }
        tokio::time::timeout(timeout, notified).await.is_ok()
    }
}
