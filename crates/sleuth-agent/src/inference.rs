//! Inference abstraction used by the workflow nodes

use std::{pin::Pin, sync::Arc};

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use sleuth_ai::{
    Context, MessageBuilder, MessageEvent, Model, StreamOptions, providers::LlmProvider,
};
use tokio_stream::Stream;

use crate::error::{Error, Result};

/// A stream of text fragments from the model
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A complete (non-streamed) model response
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// Tokens consumed by the call, reported or estimated
    pub token_count: u64,
}

/// Rough token estimate: one token per four characters
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Model calls the workflow makes
#[async_trait]
pub trait Inference: Send + Sync {
    /// Run a prompt to completion
    async fn invoke(&self, context: &Context) -> Result<Completion>;

    /// Stream a response fragment by fragment
    async fn stream(&self, context: &Context) -> Result<TokenStream>;
}

/// [`Inference`] backed by a chat-completions provider
pub struct ProviderInference {
    provider: Arc<dyn LlmProvider>,
    model: Model,
    options: StreamOptions,
}

impl ProviderInference {
    pub fn new(provider: Arc<dyn LlmProvider>, model: Model) -> Self {
        Self {
            provider,
            model,
            options: StreamOptions {
                max_tokens: None,
                temperature: Some(0.0),
            },
        }
    }
}

#[async_trait]
impl Inference for ProviderInference {
    async fn invoke(&self, context: &Context) -> Result<Completion> {
        let mut events = self.provider.stream(&self.model, context, &self.options).await?;
        let mut builder = MessageBuilder::new();
        while let Some(event) = events.next().await {
            let terminal = event.is_terminal();
            builder.process_event(&event);
            if terminal {
                break;
            }
        }

        if let Some(error) = builder.error() {
            return Err(Error::Inference(error.to_string()));
        }

        let reported = u64::from(builder.usage().total());
        let text = builder.current_text().to_string();
        let token_count = if reported > 0 {
            reported
        } else {
            estimate_tokens(&text) + (context.char_len() as u64).div_ceil(4)
        };

        tracing::debug!(model = %self.model.id, tokens = token_count, "Completion finished");
        Ok(Completion { text, token_count })
    }

    async fn stream(&self, context: &Context) -> Result<TokenStream> {
        let mut events = self.provider.stream(&self.model, context, &self.options).await?;
        Ok(Box::pin(stream! {
            while let Some(event) = events.next().await {
                match event {
                    MessageEvent::TextDelta { delta } => yield Ok(delta),
                    MessageEvent::Error { message } => {
                        yield Err(Error::Inference(message));
                        break;
                    }
                    MessageEvent::Done { .. } => break,
                    MessageEvent::Start { .. } => {}
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sleuth_ai::{Message, MessageEventStream, StopReason, Usage};

    struct FixedProvider {
        events: Vec<MessageEvent>,
    }

    #[async_trait]
    impl LlmProvider for FixedProvider {
        async fn stream(
            &self,
            _model: &Model,
            _context: &Context,
            _options: &StreamOptions,
        ) -> sleuth_ai::Result<MessageEventStream> {
            Ok(Box::pin(futures::stream::iter(self.events.clone())))
        }
    }

    fn inference(events: Vec<MessageEvent>) -> ProviderInference {
        ProviderInference::new(
            Arc::new(FixedProvider { events }),
            Model::new("test", "http://localhost:11434/v1"),
        )
    }

    fn deltas(parts: &[&str]) -> Vec<MessageEvent> {
        parts
            .iter()
            .map(|p| MessageEvent::TextDelta {
                delta: p.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[tokio::test]
    async fn test_invoke_uses_reported_usage() {
        let mut events = deltas(&["deep"]);
        events.push(MessageEvent::Done {
            message: Message::assistant("deep"),
            stop_reason: StopReason::Stop,
            usage: Usage { input: 40, output: 2 },
        });
        let completion = inference(events).invoke(&Context::default()).await.unwrap();
        assert_eq!(completion.text, "deep");
        assert_eq!(completion.token_count, 42);
    }

    #[tokio::test]
    async fn test_invoke_estimates_without_usage() {
        let mut events = deltas(&["quick"]);
        events.push(MessageEvent::Done {
            message: Message::assistant("quick"),
            stop_reason: StopReason::Stop,
            usage: Usage::default(),
        });
        let ctx = Context::with_system("abcdefgh");
        let completion = inference(events).invoke(&ctx).await.unwrap();
        assert_eq!(completion.token_count, 2 + 2);
    }

    #[tokio::test]
    async fn test_invoke_surfaces_stream_error() {
        let mut events = deltas(&["par"]);
        events.push(MessageEvent::Error {
            message: "SSE error: connection closed".into(),
        });
        let err = inference(events).invoke(&Context::default()).await.unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn test_stream_yields_deltas_then_error() {
        let mut events = deltas(&["a", "b"]);
        events.push(MessageEvent::Error {
            message: "boom".into(),
        });
        events.extend(deltas(&["never"]));

        let stream = inference(events).stream(&Context::default()).await.unwrap();
        let items: Vec<Result<String>> = stream.collect().await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), "a");
        assert_eq!(items[1].as_ref().unwrap(), "b");
        assert!(items[2].is_err());
    }
}
