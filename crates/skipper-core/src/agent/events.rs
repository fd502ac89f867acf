//! Progress-event protocol between the orchestrator and its consumers.
//!
//! Every event carries the id of the conversation that produced it, so a
//! UI can drop updates for a conversation that is no longer on screen
//! while the store still records them.

use serde::Serialize;

use crate::types::{PlanStep, ToolResult};

/// Events emitted by a running task, one channel per execution.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A plan was produced (initially or by a replan).
    PlanReady {
        conversation_id: String,
        steps: Vec<PlanStep>,
    },

    /// A plan step is about to execute.
    StepStarted {
        conversation_id: String,
        iteration: usize,
        step: u32,
        purpose: String,
        command: String,
    },

    /// The safety filter refused a command; nothing was executed.
    StepBlocked {
        conversation_id: String,
        command: String,
        reason: String,
    },

    /// A step finished (successfully or not) with its result.
    StepCompleted {
        conversation_id: String,
        iteration: usize,
        result: ToolResult,
    },

    /// Verdict from the analysis stage of the deliberative loop.
    Analysis {
        conversation_id: String,
        needs_replan: bool,
        reason: String,
        complete: bool,
    },

    /// The deliberative loop is rebuilding its plan.
    Replanning {
        conversation_id: String,
        reason: String,
    },

    /// A reactive-loop thought.
    Thought {
        conversation_id: String,
        iteration: usize,
        thought: String,
    },

    /// The real observation injected after executing a reactive command.
    Observation {
        conversation_id: String,
        iteration: usize,
        output: String,
    },

    /// Live text delta from a streaming model response.
    TextDelta {
        conversation_id: String,
        delta: String,
    },

    /// Live reasoning delta; display-only, never persisted.
    ReasoningDelta {
        conversation_id: String,
        delta: String,
    },

    /// A tool result surfaced mid-stream.
    ToolResult {
        conversation_id: String,
        result: ToolResult,
    },

    /// The task finished. Cancellation is a normal completion with
    /// `cancelled = true`, never an `Error`.
    Completed {
        conversation_id: String,
        report: String,
        cancelled: bool,
    },

    /// The task failed fatally (no transport, unrecoverable config).
    Error {
        conversation_id: String,
        error: String,
    },
}

impl AgentEvent {
    /// The conversation this event belongs to.
    pub fn conversation_id(&self) -> &str {
        match self {
            AgentEvent::PlanReady { conversation_id, .. }
            | AgentEvent::StepStarted { conversation_id, .. }
            | AgentEvent::StepBlocked { conversation_id, .. }
            | AgentEvent::StepCompleted { conversation_id, .. }
            | AgentEvent::Analysis { conversation_id, .. }
            | AgentEvent::Replanning { conversation_id, .. }
            | AgentEvent::Thought { conversation_id, .. }
            | AgentEvent::Observation { conversation_id, .. }
            | AgentEvent::TextDelta { conversation_id, .. }
            | AgentEvent::ReasoningDelta { conversation_id, .. }
            | AgentEvent::ToolResult { conversation_id, .. }
            | AgentEvent::Completed { conversation_id, .. }
            | AgentEvent::Error { conversation_id, .. } => conversation_id,
        }
    }
}
