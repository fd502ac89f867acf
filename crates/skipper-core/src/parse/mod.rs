//! Parsers for structured data embedded in free-form model output.

mod plan;
mod response;

pub use plan::{parse_analysis, parse_plan, Analysis};
pub use response::{is_done_phrase, parse_agent_response, AgentReply, COMPLETION_TOKEN};
