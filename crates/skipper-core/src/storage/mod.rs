//! Persistence layer
//!
//! SQLite-based storage for:
//! - Conversations and the per-context active pointer
//! - Messages with compacted tool results
//! - Deterministic compaction of oversized output

mod compaction;
mod conversations;
mod database;

pub use compaction::{
    strip_reasoning_blocks, summarize_text, summarize_tool_result, DEFAULT_MAX_TOOL_OUTPUT_BYTES,
};
pub use conversations::{title_from_content, ConversationStore};
pub use database::Database;
