//! Core data model: conversations, messages, tool results, plans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A titled, ordered sequence of turns, optionally tied to an external
/// context such as a remote-session connection id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub external_context_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

/// Conversation plus its message count, for list views.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub message_count: usize,
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(ChatRole::User),
            "assistant" => Some(ChatRole::Assistant),
            "tool" => Some(ChatRole::Tool),
            _ => None,
        }
    }
}

/// One persisted turn of a conversation.
///
/// Messages are totally ordered by the autoincrement row id; `timestamp`
/// is display metadata. A `Tool` message's `content` is derived from its
/// `tool_results` at save time, never authored independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub conversation_id: String,
    pub role: ChatRole,
    pub content: String,
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    pub timestamp: DateTime<Utc>,
}

/// Structured output of one executed command.
///
/// Once persisted, `stdout`/`stderr` combined stay under the configured
/// byte cap; oversized output is compacted before storage and flagged
/// with `summary = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub summary: bool,
    #[serde(default)]
    pub original_size: Option<usize>,
}

impl ToolResult {
    /// A result for a command that ran and produced output.
    pub fn executed(command: &str, output: &str, error: Option<&str>) -> Self {
        Self {
            name: "shell".to_string(),
            success: error.is_none(),
            exit_code: if error.is_none() { 0 } else { 1 },
            stdout: output.to_string(),
            stderr: error.unwrap_or_default().to_string(),
            command: Some(command.to_string()),
            summary: false,
            original_size: None,
        }
    }

    /// A result recording a command that was blocked before execution.
    pub fn blocked(command: &str, reason: &str) -> Self {
        Self {
            name: "shell".to_string(),
            success: false,
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("Command blocked: {}", reason),
            command: Some(command.to_string()),
            summary: false,
            original_size: None,
        }
    }
}

/// One step of a generated plan.
///
/// Step numbers increase monotonically but are not required to stay
/// contiguous across replans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step: u32,
    pub command: String,
    pub purpose: String,
}

/// An ordered, non-empty list of plan steps.
pub type Plan = Vec<PlanStep>;
