//! Error types for sleuth-agent

use thiserror::Error;

use crate::progress::RunFailure;

/// Result type alias using sleuth-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the research workflow
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the model provider layer
    #[error(transparent)]
    Ai(#[from] sleuth_ai::Error),

    /// The model stream reported a failure mid-response
    #[error("Inference error: {0}")]
    Inference(String),

    /// Long-term memory could not be read or written
    #[error("Memory error: {0}")]
    Memory(String),

    /// A checkpoint could not be read or written
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// The transition table has no row for the current node, or the step cap was hit
    #[error("State machine error: {0}")]
    StateMachine(String),

    /// The background run failed; carries the captured failure verbatim
    #[error("Run failed: {}", .0.message)]
    Worker(RunFailure),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the model endpoint could not be reached.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Error::Ai(e) => e.is_unreachable(),
            Error::Inference(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("connection") || msg.contains("timed out")
            }
            _ => false,
        }
    }
}
