//! /threads, /switch, /delete - manage research threads

use super::CommandResult;
use sleuth_agent::ThreadStore;

pub struct ThreadCommand;

impl ThreadCommand {
    /// One line per thread, numbered from 1, current thread marked with `*`
    pub fn list(threads: &ThreadStore) -> String {
        let mut output = String::from("Threads\n");
        output.push_str(&"-".repeat(40));
        output.push('\n');

        for (i, thread) in threads.list().iter().enumerate() {
            let marker = if i == threads.current_index() { '*' } else { ' ' };
            let created = chrono::DateTime::from_timestamp_millis(thread.created_at)
                .map(|t| t.with_timezone(&chrono::Local).format("%H:%M").to_string())
                .unwrap_or_default();
            output.push_str(&format!(
                "{} {:>2}. {} ({} messages, {} tokens, {})\n",
                marker,
                i + 1,
                thread.title,
                thread.messages.len(),
                thread.total_tokens,
                created
            ));
        }

        output.push_str(&format!("\nTotal tokens: {}", threads.total_tokens()));
        output
    }

    pub fn switch(args: &str, threads: &ThreadStore) -> CommandResult {
        match parse_index(args, threads) {
            Ok(index) => CommandResult::SwitchThread(index),
            Err(msg) => CommandResult::Message(msg),
        }
    }

    pub fn delete(args: &str, threads: &ThreadStore) -> CommandResult {
        if threads.len() <= 1 {
            return CommandResult::Message("Cannot delete the only thread.".to_string());
        }
        match parse_index(args, threads) {
            Ok(index) => CommandResult::DeleteThread(index),
            Err(msg) => CommandResult::Message(msg),
        }
    }
}

/// Parse a 1-based thread number into an index
fn parse_index(args: &str, threads: &ThreadStore) -> Result<usize, String> {
    match args.parse::<usize>() {
        Ok(n) if (1..=threads.len()).contains(&n) => Ok(n - 1),
        Ok(n) => Err(format!(
            "Invalid thread {}. Valid range: 1-{}",
            n,
            threads.len()
        )),
        Err(_) => Err(format!(
            "Invalid thread '{}'. Use a number from /threads (1-{}).",
            args,
            threads.len()
        )),
    }
}
