//! Runs a workflow pass on a background task and relays its progress

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::{
    error::{Error, Result},
    events::ObserverEvent,
    graph::NodeId,
    progress::{RunFailure, RunProgress},
    state::AgentState,
    streaming::BufferRegistry,
    workflow::{RunRequest, Workflow},
};

/// How the observer waits between drains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainMode {
    /// Sleep a fixed interval, then drain whatever is queued
    #[default]
    Poll,
    /// Park until tokens arrive or the run completes, up to the interval
    Wait,
}

/// Driver configuration
#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    pub poll_interval: Duration,
    /// Upper bound on waiting for the worker task after it reports completion
    pub join_timeout: Duration,
    pub drain_mode: DrainMode,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            join_timeout: Duration::from_secs(5),
            drain_mode: DrainMode::Poll,
        }
    }
}

/// The result of a completed run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The final report, or the streamed text when the run produced none
    pub report: String,
    pub state: AgentState,
    pub nodes: Vec<NodeId>,
}

/// Starts workflow runs on background tasks
pub struct ExecutionDriver {
    workflow: Arc<Workflow>,
    config: DriverConfig,
}

impl ExecutionDriver {
    pub fn new(workflow: Arc<Workflow>) -> Self {
        Self {
            workflow,
            config: DriverConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn workflow(&self) -> &Arc<Workflow> {
        &self.workflow
    }

    /// Spawn a run. Errors and panics inside it are captured into the progress record.
    pub fn start(&self, request: RunRequest) -> RunObserver {
        let progress = RunProgress::new();
        let worker_progress = progress.clone();
        let workflow = Arc::clone(&self.workflow);

        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(workflow.run(&request, &worker_progress))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(state)) => worker_progress.finish(state),
                Ok(Err(e)) => {
                    tracing::error!(session = %request.session_id, "Run failed: {}", e);
                    worker_progress.fail(RunFailure::from_error(&e));
                }
                Err(panic) => {
                    let failure = RunFailure::from_panic(panic);
                    tracing::error!(session = %request.session_id, "{}", failure.message);
                    worker_progress.fail(failure);
                }
            }
        });

        RunObserver {
            progress,
            buffers: self.workflow.buffers().clone(),
            handle,
            config: self.config,
            node_cursor: 0,
            streamed: String::new(),
        }
    }

    /// Start a run and observe it to the end
    pub async fn run<F>(&self, request: RunRequest, on_event: F) -> Result<RunOutcome>
    where
        F: FnMut(&ObserverEvent),
    {
        self.start(request).finish(on_event).await
    }
}

/// Foreground side of a run: polls progress and drains streamed tokens
pub struct RunObserver {
    progress: RunProgress,
    buffers: BufferRegistry,
    handle: JoinHandle<()>,
    config: DriverConfig,
    node_cursor: usize,
    streamed: String,
}

impl RunObserver {
    pub fn progress(&self) -> &RunProgress {
        &self.progress
    }

    /// Text drained from the buffer so far
    pub fn streamed(&self) -> &str {
        &self.streamed
    }

    /// Collect what happened since the last tick. Never blocks.
    pub fn tick(&mut self) -> Vec<ObserverEvent> {
        let mut events = Vec::new();

        for node in self.progress.nodes_since(self.node_cursor) {
            self.node_cursor += 1;
            events.push(ObserverEvent::NodeCompleted { node });
        }

        // The producer creates the buffer; until it does there is nothing to drain
        if let Some(buffer) = self
            .progress
            .query_id()
            .and_then(|query_id| self.buffers.get(&query_id))
        {
            let batch = buffer.drain();
            if !batch.is_empty() {
                let text = batch.text();
                self.streamed.push_str(&text);
                events.push(ObserverEvent::Tokens { text });
            }
        }

        events
    }

    async fn pause(&self) {
        match self.config.drain_mode {
            DrainMode::Poll => tokio::time::sleep(self.config.poll_interval).await,
            DrainMode::Wait => {
                let buffer = self
                    .progress
                    .query_id()
                    .and_then(|query_id| self.buffers.get(&query_id));
                match buffer {
                    Some(buffer) => {
                        tokio::select! {
                            _ = buffer.wait(self.config.poll_interval) => {}
                            _ = self.progress.wait_complete_timeout(self.config.poll_interval) => {}
                        }
                    }
                    None => {
                        self.progress
                            .wait_complete_timeout(self.config.poll_interval)
                            .await;
                    }
                }
            }
        }
    }

    /// Observe until the run completes, then finalize.
    ///
    /// On failure the captured error is returned verbatim and no partial
    /// result is applied. The run's buffer is cleared either way.
    pub async fn finish<F>(mut self, mut on_event: F) -> Result<RunOutcome>
    where
        F: FnMut(&ObserverEvent),
    {
        loop {
            // Completion is read before draining so the last tick sees everything
            let complete = self.progress.is_complete();
            for event in self.tick() {
                on_event(&event);
            }
            if complete {
                break;
            }
            self.pause().await;
        }

        let join_timeout = self.config.join_timeout;
        match tokio::time::timeout(join_timeout, self.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Worker task ended abnormally: {}", e),
            Err(_) => tracing::warn!(
                "Worker task still running {:?} after completing, detaching",
                join_timeout
            ),
        }

        let result = match self.progress.error() {
            Some(failure) => Err(Error::Worker(failure)),
            None => match self.progress.take_final_state() {
                Some(state) => {
                    let report = if state.final_report.is_empty() {
                        self.streamed.clone()
                    } else {
                        state.final_report.clone()
                    };
                    on_event(&ObserverEvent::Finished);
                    Ok(RunOutcome {
                        report,
                        state,
                        nodes: self.progress.nodes(),
                    })
                }
                None => Err(Error::StateMachine(
                    "run completed without a final state".to_string(),
                )),
            },
        };

        if let Some(query_id) = self.progress.query_id() {
            self.buffers.clear(&query_id);
        }
        result
    }
}
