//! Task orchestration
//!
//! Two loop strategies turn a natural-language goal into supervised
//! command execution:
//! - `DeliberativeAgent` — plan → execute-all-steps → analyze → replan
//! - `ReactiveAgent` — single-step thought → command → real observation
//!
//! Shared between them: `AgentState` (directory/history tracking),
//! `AgentEvent` (progress protocol), prompt assembly, and the
//! persistence helpers here. Command failures are step data, model
//! failures fall back to deterministic defaults; only a missing
//! transport is fatal.

pub mod deliberative;
pub mod events;
pub mod prompts;
pub mod reactive;
pub mod state;

use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::capabilities::CommandRunner;
use crate::error::AgentError;
use crate::storage::{ConversationStore, Database};
use crate::types::{ChatRole, ToolResult};

pub use deliberative::{DeliberativeAgent, DeliberativeConfig};
pub use events::AgentEvent;
pub use reactive::{ReactiveAgent, ReactiveConfig};
pub use state::{AgentState, CommandRecord};

/// Final product of one task execution.
#[derive(Debug)]
pub struct TaskOutcome {
    pub report: String,
    pub cancelled: bool,
    pub state: AgentState,
}

impl TaskOutcome {
    pub(crate) fn cancelled(state: AgentState) -> Self {
        Self {
            report: "Task cancelled".to_string(),
            cancelled: true,
            state,
        }
    }
}

pub(crate) fn emit(
    events: &mpsc::UnboundedSender<AgentEvent>,
    cancel: &CancellationToken,
    event: AgentEvent,
) {
    if !cancel.is_cancelled() {
        let _ = events.send(event);
    }
}

/// Execute one command under the per-command timeout.
///
/// A timed-out or failed command becomes `(output, Some(error))` step
/// data; only `NoTransport` propagates.
pub(crate) async fn run_command(
    runner: &dyn CommandRunner,
    command: &str,
    timeout: Duration,
) -> Result<(String, Option<String>), AgentError> {
    match tokio::time::timeout(timeout, runner.execute(command)).await {
        Ok(Ok(out)) => Ok((out.output, out.error)),
        Ok(Err(AgentError::NoTransport)) => Err(AgentError::NoTransport),
        Ok(Err(e)) => Ok((String::new(), Some(e.to_string()))),
        Err(_) => Ok((
            String::new(),
            Some(format!("command timed out after {:?}", timeout)),
        )),
    }
}

// ── Persistence helpers ────────────────────────────────────────────────
//
// A fresh connection per write keeps the loops free of connection
// lifetime concerns; failures are logged one level down and never stop
// the task.

pub(crate) fn save_tool_message(db_path: Option<&Path>, conversation_id: &str, result: &ToolResult) {
    let Some(path) = db_path else { return };
    match Database::new(path) {
        Ok(db) => {
            let store = ConversationStore::new(db);
            if let Err(e) =
                store.save_message(conversation_id, ChatRole::Tool, "", std::slice::from_ref(result))
            {
                tracing::error!(conversation_id = %conversation_id, "failed to save tool message: {}", e);
            }
        }
        Err(e) => tracing::error!("failed to open database while saving tool message: {}", e),
    }
}

pub(crate) fn save_assistant_message(db_path: Option<&Path>, conversation_id: &str, content: &str) {
    let Some(path) = db_path else { return };
    if content.is_empty() {
        return;
    }
    match Database::new(path) {
        Ok(db) => {
            let store = ConversationStore::new(db);
            if let Err(e) = store.save_message(conversation_id, ChatRole::Assistant, content, &[]) {
                tracing::error!(conversation_id = %conversation_id, "failed to save assistant message: {}", e);
            }
        }
        Err(e) => tracing::error!("failed to open database while saving assistant message: {}", e),
    }
}
