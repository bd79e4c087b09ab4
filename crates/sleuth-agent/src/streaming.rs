//! Token buffers bridging a background run to a polling observer
//!
//! One producer (the node streaming a model response) pushes tokens and finally
//! an end marker. Consumers drain whatever is queued without blocking, or park
//! on [`StreamingBuffer::next_batch`] until something arrives.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Chunk {
    Token(String),
    End,
}

#[derive(Debug, Default)]
struct BufferInner {
    queue: VecDeque<Chunk>,
    complete: bool,
    end_drained: bool,
    accumulated: String,
}

/// Tokens taken from a buffer in one drain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Drained {
    pub tokens: Vec<String>,
    /// The end marker has been consumed; no more tokens will follow
    pub finished: bool,
}

impl Drained {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn text(&self) -> String {
        self.tokens.concat()
    }
}

/// FIFO of streamed tokens for a single query
#[derive(Debug, Default)]
pub struct StreamingBuffer {
    inner: Mutex<BufferInner>,
    notify: Notify,
}

impl StreamingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a token. Tokens pushed after completion are dropped.
    pub fn push(&self, token: impl Into<String>) {
        let token = token.into();
        {
            let mut inner = self.inner.lock();
            if inner.complete {
                tracing::warn!("Token pushed to a completed buffer, dropping");
                return;
            }
            inner.accumulated.push_str(&token);
            inner.queue.push_back(Chunk::Token(token));
        }
        self.notify.notify_waiters();
    }

    /// Enqueue the end marker. Calling it again has no effect.
    pub fn mark_complete(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.complete {
                return;
            }
            inner.complete = true;
            inner.queue.push_back(Chunk::End);
        }
        self.notify.notify_waiters();
    }

    /// Whether the producer has finished
    pub fn is_complete(&self) -> bool {
        self.inner.lock().complete
    }

    /// Everything pushed so far, drained or not
    pub fn accumulated(&self) -> String {
        self.inner.lock().accumulated.clone()
    }

    /// Take every queued token without waiting.
    pub fn drain(&self) -> Drained {
        let mut inner = self.inner.lock();
        let mut tokens = Vec::with_capacity(inner.queue.len());
        while let Some(chunk) = inner.queue.pop_front() {
            match chunk {
                Chunk::Token(token) => tokens.push(token),
                Chunk::End => inner.end_drained = true,
            }
        }
        Drained {
            tokens,
            finished: inner.end_drained,
        }
    }

    /// Wait up to `timeout` for something to drain. Returns whether anything is queued.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register before checking so a push between the check and the await is not missed
            let notified = self.notify.notified();
            if self.has_pending() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.has_pending();
            }
        }
    }

    /// Wait up to `timeout` for tokens or the end marker, then drain.
    ///
    /// Returns an empty batch on timeout.
    pub async fn next_batch(&self, timeout: Duration) -> Drained {
        self.wait(timeout).await;
        self.drain()
    }

    fn has_pending(&self) -> bool {
        !self.inner.lock().queue.is_empty()
    }
}

/// Buffers keyed by query id.
///
/// Cloning shares the same table.
#[derive(Debug, Clone, Default)]
pub struct BufferRegistry {
    buffers: Arc<Mutex<HashMap<String, Arc<StreamingBuffer>>>>,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The buffer for `query_id`, created on first use
    pub fn get_or_create(&self, query_id: &str) -> Arc<StreamingBuffer> {
        Arc::clone(
            self.buffers
                .lock()
                .entry(query_id.to_string())
                .or_insert_with(|| Arc::new(StreamingBuffer::new())),
        )
    }

    /// The buffer for `query_id`, if a producer has created one
    pub fn get(&self, query_id: &str) -> Option<Arc<StreamingBuffer>> {
        self.buffers.lock().get(query_id).cloned()
    }

    /// Drop the buffer for `query_id`. Returns whether one existed.
    pub fn clear(&self, query_id: &str) -> bool {
        let removed = self.buffers.lock().remove(query_id).is_some();
        if removed {
            tracing::debug!(query_id, "Cleared streaming buffer");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.buffers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.lock().is_empty()
    }
}
