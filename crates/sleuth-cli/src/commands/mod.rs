//! Slash commands for interactive mode

mod graph;
mod thread;

pub use graph::GraphCommand;
pub use thread::ThreadCommand;

use sleuth_agent::{ThreadStore, TransitionTable};

/// Result of executing a slash command
#[derive(Debug, PartialEq, Eq)]
pub enum CommandResult {
    /// Start a new thread and select it
    NewThread,
    /// Select the thread at this index
    SwitchThread(usize),
    /// Delete the thread at this index, along with its checkpoint
    DeleteThread(usize),
    /// Show a message to the user (not sent to the workflow)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command
pub fn execute_command(
    input: &str,
    threads: &ThreadStore,
    table: &TransitionTable,
) -> Option<CommandResult> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let parts: Vec<&str> = rest.splitn(2, ' ').collect();
    let command = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "quit" | "exit" | "q" => CommandResult::Exit,

        "new" | "n" => CommandResult::NewThread,

        "threads" | "t" => CommandResult::Message(ThreadCommand::list(threads)),

        "switch" | "s" => ThreadCommand::switch(args, threads),

        "delete" | "d" => ThreadCommand::delete(args, threads),

        "graph" | "g" => GraphCommand::execute(table),

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?        Show this help message
  /new, /n             Start a new research thread
  /threads, /t         List threads
  /switch, /s <n>      Switch to thread n
  /delete, /d <n>      Delete thread n and its saved state
  /graph, /g           Show the workflow transition table
  /quit, /exit, /q     Exit sleuth

Anything else is sent as a research query on the current thread."#
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sleuth_agent::RoutingPolicy;

    fn table() -> TransitionTable {
        TransitionTable::standard(RoutingPolicy::default())
    }

    #[test]
    fn test_not_a_command() {
        let threads = ThreadStore::with_initial("cli_session");
        assert_eq!(execute_command("what is CFS?", &threads, &table()), None);
    }

    #[test]
    fn test_aliases() {
        let threads = ThreadStore::with_initial("cli_session");
        assert_eq!(
            execute_command("/NEW", &threads, &table()),
            Some(CommandResult::NewThread)
        );
        assert_eq!(
            execute_command("/q", &threads, &table()),
            Some(CommandResult::Exit)
        );
        assert_eq!(
            execute_command("/frobnicate now", &threads, &table()),
            Some(CommandResult::Unknown("frobnicate".to_string()))
        );
    }
}
