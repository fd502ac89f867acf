//! Extraction of thought/command pairs from ReAct-style model output.
//!
//! The model is prompted to answer with `Thought:` and `Command:` labels
//! and to stop before `Observation:`. Real observations are injected by
//! the orchestrator after execution, so any observation text the model
//! hallucinated is discarded here.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ParseError;

/// Token the model emits when the goal is achieved.
pub const COMPLETION_TOKEN: &str = "TASK_COMPLETE";

static THOUGHT_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*thought\s*:").expect("valid thought regex"));
static COMMAND_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*command\s*:").expect("valid command regex"));
static OBSERVATION_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*observation\s*:").expect("valid observation regex"));
static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[a-zA-Z]*\n?(.*?)```").expect("valid fence regex"));

const DONE_PHRASES: &[&str] = &[
    "task is complete",
    "task complete",
    "goal achieved",
    "goal has been achieved",
    "nothing further to do",
    "no further action",
];

/// One parsed reactive-strategy reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    pub thought: String,
    pub command: Option<String>,
    pub is_complete: bool,
}

/// Parse a reactive-strategy model response.
///
/// Recognizes the explicit completion token, otherwise extracts the
/// `Thought` span (bounded by the `Command` label or end of text) and the
/// `Command` span (bounded by the `Observation` label or end of text).
/// Fails with [`ParseError::NoCommandFound`] only when no command is
/// recoverable and the thought does not indicate completion.
pub fn parse_agent_response(text: &str) -> Result<AgentReply, ParseError> {
    if text.contains(COMPLETION_TOKEN) {
        let stripped = text.replace(COMPLETION_TOKEN, "");
        let stripped = match THOUGHT_LABEL.find(&stripped) {
            Some(m) => stripped[m.end()..].to_string(),
            None => stripped,
        };
        let thought = stripped.trim().to_string();
        return Ok(AgentReply {
            thought,
            command: None,
            is_complete: true,
        });
    }

    // Hallucinated observations are never trusted; cut before extracting.
    let text = match OBSERVATION_LABEL.find(text) {
        Some(m) => &text[..m.start()],
        None => text,
    };

    let command_label = COMMAND_LABEL.find(text);

    let thought = match THOUGHT_LABEL.find(text) {
        Some(m) => {
            let end = command_label.map(|c| c.start()).unwrap_or(text.len());
            text[m.end()..end.max(m.end())].trim().to_string()
        }
        None => match command_label {
            Some(c) => text[..c.start()].trim().to_string(),
            None => text.trim().to_string(),
        },
    };

    let command = match command_label {
        Some(m) => clean_command(&text[m.end()..]),
        // No label at all: a lone fenced block is accepted as the command.
        None => CODE_FENCE
            .captures(text)
            .and_then(|c| clean_command(c.get(1).map(|m| m.as_str()).unwrap_or_default())),
    };

    match command {
        Some(command) => Ok(AgentReply {
            thought,
            command: Some(command),
            is_complete: false,
        }),
        None if is_done_phrase(&thought) => Ok(AgentReply {
            thought,
            command: None,
            is_complete: true,
        }),
        None => Err(ParseError::NoCommandFound),
    }
}

/// Whether a thought with no command amounts to a completion signal.
pub fn is_done_phrase(thought: &str) -> bool {
    let lower = thought.to_lowercase();
    DONE_PHRASES.iter().any(|p| lower.contains(p))
}

/// Strip markdown fencing and shell-prompt glyphs from a command span.
fn clean_command(raw: &str) -> Option<String> {
    let mut span = raw.trim();

    if let Some(captures) = CODE_FENCE.captures(span) {
        span = captures.get(1).map(|m| m.as_str()).unwrap_or(span);
    } else {
        span = span.trim_matches('`');
    }

    let cleaned = span
        .lines()
        .map(|line| {
            let line = line.trim();
            line.strip_prefix("$ ")
                .or_else(|| line.strip_prefix("# "))
                .unwrap_or(line)
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}
