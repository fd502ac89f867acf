//! Prompt assembly for both loop strategies.
//!
//! All prompts that expect structured output spell out the exact JSON
//! shape; the parsers in `crate::parse` handle everything the model gets
//! wrong anyway.

use std::fmt::Write;

use crate::osdetect::OsType;
use crate::parse::COMPLETION_TOKEN;

use super::reactive::ReactTurn;
use super::state::{AgentState, CommandRecord};

fn os_hint(os: OsType) -> &'static str {
    match os {
        OsType::Linux => "The target system is Linux; use POSIX shell commands.",
        OsType::Darwin => "The target system is macOS (Darwin); use POSIX shell commands and BSD userland flags.",
        OsType::Windows => "The target system is Windows; use cmd.exe/PowerShell commands.",
        OsType::Unknown => "The target system family is unknown; start with portable identification commands.",
    }
}

pub fn planning_prompt(goal: &str, state: &AgentState) -> String {
    let mut prompt = format!(
        "You are an operations assistant planning shell commands to accomplish a goal.\n\
         {}\nCurrent directory: {}\n\nGoal: {}\n\n",
        os_hint(state.os_type),
        state.current_directory,
        goal
    );
    if !state.command_history.is_empty() {
        prompt.push_str("Output from earlier commands:\n");
        append_history(&mut prompt, state.recent_history(5));
        prompt.push('\n');
    }
    prompt.push_str(
        "Respond with only a JSON object of the form:\n\
         {\"steps\": [{\"step\": 1, \"command\": \"...\", \"purpose\": \"...\"}]}\n\
         Keep the plan short and each command non-interactive.",
    );
    prompt
}

pub fn analysis_prompt(goal: &str, command: &str, output: &str, error: Option<&str>) -> String {
    format!(
        "A step toward this goal was just executed.\n\nGoal: {}\nCommand: {}\nOutput:\n{}\n{}\n\
         Judge the result. Respond with only a JSON object:\n\
         {{\"needsReplan\": true|false, \"reason\": \"...\", \"complete\": true|false}}\n\
         Set complete=true only when the goal is fully achieved.",
        goal,
        command,
        output,
        match error {
            Some(e) => format!("Error: {}\n", e),
            None => String::new(),
        }
    )
}

pub fn replanning_prompt(goal: &str, reason: &str, state: &AgentState) -> String {
    let mut prompt = format!(
        "The current plan needs revision.\n\nGoal: {}\nReason: {}\n{}\n\nRecent steps:\n",
        goal,
        reason,
        os_hint(state.os_type)
    );
    append_history(&mut prompt, state.recent_history(5));
    prompt.push_str(
        "\nProduce a revised plan as only a JSON object:\n\
         {\"steps\": [{\"step\": 1, \"command\": \"...\", \"purpose\": \"...\"}]}",
    );
    prompt
}

pub fn report_prompt(goal: &str, state: &AgentState) -> String {
    let mut prompt = format!(
        "Summarize the outcome of this task for the user in a few sentences.\n\nGoal: {}\n\nSteps taken:\n",
        goal
    );
    append_history(&mut prompt, &state.command_history);
    prompt
}

pub fn react_prompt(goal: &str, state: &AgentState, turns: &[ReactTurn]) -> String {
    let mut prompt = format!(
        "You are an operations assistant working toward a goal one shell command at a time.\n\
         {}\nCurrent directory: {}\n\nGoal: {}\n\n\
         Answer with exactly:\nThought: <your reasoning>\nCommand: <one shell command>\n\n\
         Never write an Observation yourself; it is provided after the command runs.\n\
         When the goal is achieved, reply with a Thought and the token {} instead of a command.\n",
        os_hint(state.os_type),
        state.current_directory,
        goal,
        COMPLETION_TOKEN
    );

    if !turns.is_empty() {
        prompt.push_str("\nSo far:\n");
        for turn in turns {
            let _ = write!(
                prompt,
                "Thought: {}\nCommand: {}\nObservation: {}\n\n",
                turn.thought, turn.command, turn.observation
            );
        }
        prompt.push_str("Continue.\n");
    }

    prompt
}

fn append_history(prompt: &mut String, records: &[CommandRecord]) {
    for record in records {
        let _ = write!(prompt, "$ {}\n{}\n", record.command, record.output);
        if let Some(error) = &record.error {
            let _ = writeln!(prompt, "error: {}", error);
        }
    }
}
