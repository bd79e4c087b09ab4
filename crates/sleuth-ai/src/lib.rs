//! sleuth-ai: chat model provider layer
//!
//! This crate provides the message types, streaming events, and the
//! OpenAI-compatible chat completions provider used by the research workflow.
//! The provider speaks to hosted endpoints and to local servers such as Ollama.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use stream::{MessageBuilder, MessageEvent, MessageEventStream};
pub use types::*;
