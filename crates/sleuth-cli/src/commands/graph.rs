//! /graph command - show the workflow transition table

use super::CommandResult;
use sleuth_agent::TransitionTable;

pub struct GraphCommand;

impl GraphCommand {
    pub fn execute(table: &TransitionTable) -> CommandResult {
        let policy = table.policy();
        let mut output = format!(
            "Workflow (threshold {:.2}, max {} research passes)\n",
            policy.confidence_threshold, policy.max_iterations
        );
        output.push_str(&"-".repeat(40));
        output.push('\n');
        output.push_str(&format!("entry: {}\n", table.entry()));
        output.push_str(&table.to_string());
        CommandResult::Message(output.trim_end().to_string())
    }
}
