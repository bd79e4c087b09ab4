//! Observer event types

use serde::{Deserialize, Serialize};

use crate::graph::NodeId;

/// Events the execution driver reports while a run progresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverEvent {
    /// A workflow node finished
    NodeCompleted { node: NodeId },

    /// Streamed tokens drained from the run's buffer
    Tokens { text: String },

    /// The run completed successfully
    Finished,
}
