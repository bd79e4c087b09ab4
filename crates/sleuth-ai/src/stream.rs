//! Streaming event types and utilities

use crate::types::{AssistantMetadata, Message, StopReason, Usage};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted during message streaming
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    /// Initial message structure
    Start { message: Message },
    /// Text content delta
    TextDelta { delta: String },
    /// Message completed successfully
    Done {
        message: Message,
        stop_reason: StopReason,
        usage: Usage,
    },
    /// Error occurred
    Error { message: String },
}

impl MessageEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageEvent::Done { .. } | MessageEvent::Error { .. })
    }
}

/// A stream of message events
pub type MessageEventStream = Pin<Box<dyn Stream<Item = MessageEvent> + Send>>;

/// Builder for constructing an assistant message from streaming events
#[derive(Debug, Default)]
pub struct MessageBuilder {
    text: String,
    model: Option<String>,
    usage: Usage,
    stop_reason: Option<StopReason>,
    error: Option<String>,
}

impl MessageBuilder {
    /// Create a new message builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a streaming event and update the message state
    pub fn process_event(&mut self, event: &MessageEvent) {
        match event {
            MessageEvent::Start { message } => {
                if let Message::Assistant { metadata, .. } = message {
                    self.model = metadata.model.clone();
                }
            }
            MessageEvent::TextDelta { delta } => self.text.push_str(delta),
            MessageEvent::Done {
                stop_reason, usage, ..
            } => {
                self.stop_reason = Some(*stop_reason);
                self.usage = usage.clone();
            }
            MessageEvent::Error { message } => {
                self.stop_reason = Some(StopReason::Error);
                self.error = Some(message.clone());
            }
        }
    }

    /// Text accumulated so far
    pub fn current_text(&self) -> &str {
        &self.text
    }

    /// Error reported by the stream, if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Usage reported by the final event
    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    /// Build the final message
    pub fn build(self) -> Message {
        Message::Assistant {
            content: self.text,
            metadata: AssistantMetadata {
                model: self.model,
                usage: self.usage,
                stop_reason: self.stop_reason,
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        }
    }
}
