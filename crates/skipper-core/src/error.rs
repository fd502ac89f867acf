//! Error taxonomy for the agent engine.
//!
//! Most failures are recovered in place with deterministic fallbacks and
//! never surface as `Err` — command failures become step results, model
//! failures fall back to canned plans. Only the conditions here cross
//! module boundaries.

use thiserror::Error;

/// Failure to extract structured data from model output.
///
/// Raised only when repair and partial extraction both come up empty.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The response contained no recoverable command and no completion signal.
    #[error("no command found in model response")]
    NoCommandFound,

    /// No plan steps could be recovered, even partially.
    #[error("no plan could be recovered from model response")]
    NoPlanFound,
}

/// Top-level error type for agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model backend could not be reached or returned a hard failure.
    #[error("model call failed: {0}")]
    ModelCall(String),

    /// Structured model output was unusable after repair attempts.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A remote command failed to run. Loops record this as step data;
    /// it only propagates when execution itself is impossible.
    #[error("command execution failed: {0}")]
    Execution(String),

    /// No live channel is available to execute commands on. Fatal.
    #[error("no live channel available for command execution")]
    NoTransport,

    /// The conversation already has an execution in flight.
    #[error("conversation {0} already has an execution in flight")]
    Busy(String),

    /// Persistence failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Cooperative cancellation. A normal termination, not a failure;
    /// the task wrapper maps this to a completed-with-cancelled outcome.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Storage(err.to_string())
    }
}
