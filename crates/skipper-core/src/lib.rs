//! Core engine for Skipper, a goal-driven command agent embedded in a
//! terminal client.
//!
//! The crate is organized around three concerns:
//!
//! * running a model-guided command loop against a host shell
//!   ([`agent`]), in either a plan-first (deliberative) or
//!   step-at-a-time (reactive) strategy;
//! * aggregating model output streams into deltas and tool results
//!   ([`stream`]) and recovering structure from imperfect model text
//!   ([`parse`]);
//! * persisting conversations with bounded tool output ([`storage`])
//!   and keeping at most one task in flight per conversation
//!   ([`tasks`]).
//!
//! Hosts plug in their own transport and model backend through the
//! [`capabilities`] traits.

pub mod agent;
pub mod capabilities;
pub mod error;
pub mod osdetect;
pub mod parse;
pub mod safety;
pub mod storage;
pub mod stream;
pub mod tasks;
pub mod types;

pub use agent::{
    AgentEvent, AgentState, DeliberativeAgent, DeliberativeConfig, ReactiveAgent, ReactiveConfig,
    TaskOutcome,
};
pub use capabilities::{CommandOutput, CommandRunner, ModelClient};
pub use error::{AgentError, ParseError};
pub use storage::{ConversationStore, Database};
pub use stream::{StreamAggregator, StreamChannel, StreamEvent, StreamOutcome};
pub use tasks::{ActiveFilter, TaskTracker};
pub use types::{ChatMessage, ChatRole, Conversation, ConversationSummary, Plan, PlanStep, ToolResult};
