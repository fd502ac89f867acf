//! Conversation and message CRUD.
//!
//! Two storage-layer invariants are enforced at save time, not left to
//! callers: tool results are compacted to the configured byte cap before
//! the INSERT ever runs, and assistant text has chain-of-thought blocks
//! stripped. History read back from this store is therefore always safe
//! to replay into a model call.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::types::{ChatMessage, ChatRole, Conversation, ConversationSummary, ToolResult};

use super::compaction::{
    strip_reasoning_blocks, summarize_tool_result, DEFAULT_MAX_TOOL_OUTPUT_BYTES,
};
use super::database::Database;

const DEFAULT_TITLE: &str = "New task";

/// Persistence for conversations, messages, and the per-context
/// active-conversation pointer.
pub struct ConversationStore {
    db: Database,
    max_tool_output_bytes: usize,
}

impl ConversationStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            max_tool_output_bytes: DEFAULT_MAX_TOOL_OUTPUT_BYTES,
        }
    }

    /// Override the tool-output byte cap (testing and tuning).
    pub fn with_output_cap(db: Database, max_tool_output_bytes: usize) -> Self {
        Self {
            db,
            max_tool_output_bytes,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    // ── Conversations ──────────────────────────────────────────────────

    pub fn create_conversation(
        &self,
        title: Option<&str>,
        external_context_id: Option<&str>,
    ) -> Result<Conversation> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let title = title.unwrap_or(DEFAULT_TITLE);

        self.db.conn().execute(
            "INSERT INTO conversations (id, title, external_context_id, created_at, updated_at, version)
             VALUES (?1, ?2, ?3, ?4, ?4, 1)",
            params![id, title, external_context_id, now.to_rfc3339()],
        )?;

        Ok(Conversation {
            id,
            title: title.to_string(),
            external_context_id: external_context_id.map(ToString::to_string),
            created_at: now,
            updated_at: now,
            version: 1,
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.db
            .conn()
            .query_row(
                "SELECT id, title, external_context_id, created_at, updated_at, version
                 FROM conversations WHERE id = ?1",
                [id],
                map_conversation_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Conversations tied to an external context, most recent first.
    pub fn get_by_context(&self, external_context_id: &str) -> Result<Vec<Conversation>> {
        let mut stmt = self.db.conn().prepare(
            "SELECT id, title, external_context_id, created_at, updated_at, version
             FROM conversations WHERE external_context_id = ?1
             ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([external_context_id], map_conversation_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// The active conversation for a context, creating one (and pointing
    /// the context at it) when none exists.
    pub fn get_or_create_active(&self, external_context_id: &str) -> Result<Conversation> {
        if let Some(id) = self.get_active(external_context_id)? {
            if let Some(conversation) = self.get_conversation(&id)? {
                return Ok(conversation);
            }
        }
        let conversation = self.create_conversation(None, Some(external_context_id))?;
        self.set_active(external_context_id, &conversation.id)?;
        Ok(conversation)
    }

    /// Rename a conversation, bumping `updated_at` and `version`.
    pub fn update_title(&self, id: &str, title: &str) -> Result<()> {
        let affected = self.db.conn().execute(
            "UPDATE conversations
             SET title = ?1, updated_at = ?2, version = version + 1
             WHERE id = ?3",
            params![title, Utc::now().to_rfc3339(), id],
        )?;
        if affected == 0 {
            return Err(anyhow!("no conversation with id {}", id));
        }
        Ok(())
    }

    /// Delete a conversation and all its messages atomically. Active
    /// pointers and messages go with it via cascade.
    pub fn delete_conversation(&self, id: &str) -> Result<()> {
        self.db
            .conn()
            .execute("DELETE FROM conversations WHERE id = ?1", [id])?;
        tracing::info!(conversation_id = %id, "conversation deleted");
        Ok(())
    }

    /// List conversations with message counts, most recent first.
    /// `external_context_id = None` lists everything.
    pub fn list_conversations(
        &self,
        external_context_id: Option<&str>,
    ) -> Result<Vec<ConversationSummary>> {
        let sql_for_context = "SELECT c.id, c.title, c.external_context_id, c.created_at,
                    c.updated_at, c.version,
                    (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id)
             FROM conversations c
             WHERE c.external_context_id = ?1
             ORDER BY c.updated_at DESC";
        let sql_all = "SELECT c.id, c.title, c.external_context_id, c.created_at,
                    c.updated_at, c.version,
                    (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id)
             FROM conversations c
             ORDER BY c.updated_at DESC";

        let map = |row: &rusqlite::Row| -> rusqlite::Result<ConversationSummary> {
            let count: i64 = row.get(6)?;
            Ok(ConversationSummary {
                conversation: map_conversation_row(row)?,
                message_count: count as usize,
            })
        };

        let summaries = match external_context_id {
            Some(ctx) => {
                let mut stmt = self.db.conn().prepare(sql_for_context)?;
                let rows = stmt.query_map([ctx], map)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self.db.conn().prepare(sql_all)?;
                let rows = stmt.query_map([], map)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(summaries)
    }

    // ── Messages ───────────────────────────────────────────────────────

    /// Append a message, applying the storage invariants for its role.
    ///
    /// Tool messages have their results compacted and their content
    /// re-derived from the compacted results. Assistant messages are
    /// stripped of chain-of-thought blocks. The first user message of a
    /// still-untitled conversation also sets the title.
    pub fn save_message(
        &self,
        conversation_id: &str,
        role: ChatRole,
        content: &str,
        tool_results: &[ToolResult],
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();

        let (content, results) = match role {
            ChatRole::Tool => {
                let compacted: Vec<ToolResult> = tool_results
                    .iter()
                    .map(|r| summarize_tool_result(r, self.max_tool_output_bytes))
                    .collect();
                (render_tool_content(&compacted), compacted)
            }
            ChatRole::Assistant => (strip_reasoning_blocks(content), tool_results.to_vec()),
            ChatRole::User => (content.to_string(), tool_results.to_vec()),
        };

        let results_json = if results.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&results)?)
        };

        self.db.conn().execute(
            "INSERT INTO messages (conversation_id, role, content, tool_results, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![conversation_id, role.as_str(), content, results_json, now],
        )?;
        let message_id = self.db.conn().last_insert_rowid();

        self.db.conn().execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![now, conversation_id],
        )?;

        if role == ChatRole::User {
            self.maybe_autotitle(conversation_id, &content)?;
        }

        Ok(message_id)
    }

    /// Message history in insertion order. `limit` keeps only the tail.
    pub fn history(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ChatMessage>> {
        let sql = match limit {
            Some(n) => format!(
                "SELECT id, conversation_id, role, content, tool_results, created_at
                 FROM (SELECT * FROM messages WHERE conversation_id = ?1
                       ORDER BY id DESC LIMIT {})
                 ORDER BY id",
                n
            ),
            None => "SELECT id, conversation_id, role, content, tool_results, created_at
                     FROM messages WHERE conversation_id = ?1 ORDER BY id"
                .to_string(),
        };

        let mut stmt = self.db.conn().prepare(&sql)?;
        let rows = stmt.query_map([conversation_id], |row| {
            let role_str: String = row.get(2)?;
            let results_json: Option<String> = row.get(4)?;
            let created_at: String = row.get(5)?;
            Ok(ChatMessage {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                role: ChatRole::parse(&role_str).unwrap_or(ChatRole::Assistant),
                content: row.get(3)?,
                tool_results: results_json
                    .as_deref()
                    .and_then(|j| serde_json::from_str(j).ok())
                    .unwrap_or_default(),
                timestamp: parse_timestamp(&created_at),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Active pointer ─────────────────────────────────────────────────

    pub fn set_active(&self, external_context_id: &str, conversation_id: &str) -> Result<()> {
        self.db.conn().execute(
            "INSERT OR REPLACE INTO active_conversations (external_context_id, conversation_id)
             VALUES (?1, ?2)",
            params![external_context_id, conversation_id],
        )?;
        Ok(())
    }

    pub fn get_active(&self, external_context_id: &str) -> Result<Option<String>> {
        self.db
            .conn()
            .query_row(
                "SELECT conversation_id FROM active_conversations WHERE external_context_id = ?1",
                [external_context_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Remove every conversation, message, and active pointer.
    pub fn clear_all(&self) -> Result<()> {
        self.db.conn().execute_batch(
            "DELETE FROM active_conversations;
             DELETE FROM messages;
             DELETE FROM conversations;",
        )?;
        Ok(())
    }

    // ── Title generation ───────────────────────────────────────────────

    fn maybe_autotitle(&self, conversation_id: &str, content: &str) -> Result<()> {
        let (title, count): (String, i64) = self.db.conn().query_row(
            "SELECT title, (SELECT COUNT(*) FROM messages WHERE conversation_id = ?1)
             FROM conversations WHERE id = ?1",
            [conversation_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        if count == 1 && title == DEFAULT_TITLE {
            let generated = title_from_content(content);
            if !generated.is_empty() {
                self.update_title(conversation_id, &generated)?;
            }
        }
        Ok(())
    }
}

/// Derive a display title from the first user turn: first line, truncated
/// at a word boundary. Char-based indexing for UTF-8 safety.
pub fn title_from_content(content: &str) -> String {
    const MAX_CHARS: usize = 50;

    let first_line = content.lines().next().unwrap_or("").trim();
    if first_line.chars().count() <= MAX_CHARS {
        return first_line.to_string();
    }

    let window: String = first_line.chars().take(MAX_CHARS).collect();
    if let Some(pos) = window.rfind(char::is_whitespace) {
        let prefix = window[..pos].trim_end();
        if prefix.chars().count() > 20 {
            return format!("{}...", prefix);
        }
    }

    let truncated: String = first_line.chars().take(MAX_CHARS - 3).collect();
    format!("{}...", truncated)
}

/// Tool-message content is derived from the (already compacted) results.
fn render_tool_content(results: &[ToolResult]) -> String {
    results
        .iter()
        .map(|r| {
            let mut block = match &r.command {
                Some(cmd) => format!("$ {}\n", cmd),
                None => String::new(),
            };
            if !r.stdout.is_empty() {
                block.push_str(&r.stdout);
                block.push('\n');
            }
            if !r.stderr.is_empty() {
                block.push_str(&r.stderr);
                block.push('\n');
            }
            block.push_str(&format!("(exit {})", r.exit_code));
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn map_conversation_row(row: &rusqlite::Row) -> rusqlite::Result<Conversation> {
    let created_at: String = row.get(3)?;
    let updated_at: String = row.get(4)?;
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        external_context_id: row.get(2)?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
        version: row.get(5)?,
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
