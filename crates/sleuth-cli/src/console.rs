//! Console rendering of a run as it progresses

use sleuth_agent::{ObserverEvent, RunOutcome};
use std::io::{self, Write};

/// Prints node progress to stderr and streamed tokens to stdout
#[derive(Debug, Default)]
pub struct Console {
    streamed: String,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event(&mut self, event: &ObserverEvent) {
        match event {
            ObserverEvent::NodeCompleted { node } => {
                if self.streamed.is_empty() {
                    eprintln!("[{}]", node);
                } else {
                    tracing::debug!(node = %node, "Node finished while streaming");
                }
            }
            ObserverEvent::Tokens { text } => {
                if self.streamed.is_empty() {
                    println!();
                }
                print!("{}", text);
                let _ = io::stdout().flush();
                self.streamed.push_str(text);
            }
            ObserverEvent::Finished => {}
        }
    }

    /// Print whatever part of the final report was not already streamed
    pub fn finish(&self, outcome: &RunOutcome) {
        match unstreamed_tail(&outcome.report, &self.streamed) {
            Some(tail) => print!("{}", tail),
            None => {
                if !self.streamed.is_empty() {
                    println!("\n");
                }
                print!("{}", outcome.report);
            }
        }
        if !outcome.report.ends_with('\n') {
            println!();
        }
        println!(
            "\n[{} steps | mode: {} | confidence: {:.2} | tokens: {}]",
            outcome.nodes.len(),
            outcome
                .state
                .mode
                .map(|m| m.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            outcome.state.confidence_score,
            outcome.state.token_usage
        );
        let _ = io::stdout().flush();
    }
}

/// The report after the streamed prefix, when the report extends what was streamed
fn unstreamed_tail<'a>(report: &'a str, streamed: &str) -> Option<&'a str> {
    if streamed.is_empty() {
        return None;
    }
    report.strip_prefix(streamed)
}
