//! sleuth-agent: research workflow runtime
//!
//! This crate provides the workflow state machine that triages a developer's
//! query, answers it directly or through a bounded research loop, and streams
//! the answer to an observer running on another task.

pub mod artifact;
pub mod assessment;
pub mod checkpoint;
pub mod driver;
pub mod error;
pub mod events;
pub mod graph;
pub mod inference;
pub mod memory;
pub mod nodes;
pub mod progress;
pub mod prompts;
pub mod search;
pub mod state;
pub mod streaming;
pub mod thread;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use artifact::{FileReportSink, ReportSink};
pub use checkpoint::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
pub use driver::{DrainMode, DriverConfig, ExecutionDriver, RunObserver, RunOutcome};
pub use error::{Error, Result};
pub use events::ObserverEvent;
pub use graph::{NodeId, RoutingPolicy, Target, TransitionTable};
pub use inference::{Completion, Inference, ProviderInference};
pub use memory::{InMemoryMemory, JsonlMemory, Memory};
pub use nodes::Services;
pub use progress::{RunFailure, RunProgress};
pub use search::{DuckDuckGoSearch, Search, SearchOutcome, TavilySearch};
pub use state::{AgentState, Mode};
pub use streaming::{BufferRegistry, StreamingBuffer};
pub use thread::{ReplyMeta, Thread, ThreadStore};
pub use workflow::{RunRequest, Workflow, WorkflowConfig};
