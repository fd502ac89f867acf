//! Deterministic compaction of oversized text and tool output.
//!
//! Unsummarized history reloaded into a future model call grows without
//! bound and can blow past the model's context limit, so the store never
//! persists a raw oversized tool result — this module is the hard cap.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::ToolResult;

/// Default combined stdout/stderr byte cap for a persisted tool result.
pub const DEFAULT_MAX_TOOL_OUTPUT_BYTES: usize = 10 * 1024;

const HEAD_LINES: usize = 40;
const TAIL_LINES: usize = 40;
/// Byte floor each of stdout/stderr gets when splitting a budget.
const MIN_FIELD_BUDGET: usize = 512;
/// Reserved for the omission marker so output stays inside the budget
/// (which is what makes compaction idempotent).
const MARKER_RESERVE: usize = 128;

static REASONING_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>\s*").expect("valid reasoning regex"));
static DANGLING_REASONING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*$").expect("valid dangling reasoning regex"));

/// Compact `text` to roughly `max_bytes`.
///
/// Text within budget is returned byte-identical. Oversized text keeps
/// the first and last lines with a single marker line reporting what was
/// omitted; inputs with too few lines for a meaningful head/tail split
/// fall back to byte-prefix truncation. Output always fits the budget,
/// so compacting already-compacted text is a no-op.
pub fn summarize_text(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let lines: Vec<&str> = text.lines().collect();
    if lines.len() < HEAD_LINES + TAIL_LINES + 2 {
        return prefix_truncate(text, max_bytes);
    }

    let half = max_bytes.saturating_sub(MARKER_RESERVE) / 2;

    let mut head: Vec<&str> = Vec::new();
    let mut used = 0usize;
    for line in lines.iter().take(HEAD_LINES) {
        if used + line.len() + 1 > half {
            break;
        }
        used += line.len() + 1;
        head.push(line);
    }

    let mut tail: Vec<&str> = Vec::new();
    used = 0;
    for line in lines.iter().rev().take(TAIL_LINES) {
        if used + line.len() + 1 > half {
            break;
        }
        used += line.len() + 1;
        tail.push(line);
    }
    tail.reverse();

    if head.is_empty() && tail.is_empty() {
        return prefix_truncate(text, max_bytes);
    }

    let omitted = lines.len() - head.len() - tail.len();
    format!(
        "{}\n[... {} lines omitted ({} bytes total) ...]\n{}",
        head.join("\n"),
        omitted,
        text.len(),
        tail.join("\n")
    )
}

fn prefix_truncate(text: &str, max_bytes: usize) -> String {
    let keep = floor_char_boundary(text, max_bytes.saturating_sub(MARKER_RESERVE));
    format!(
        "{}\n[... truncated, {} of {} bytes shown ...]",
        &text[..keep],
        keep,
        text.len()
    )
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut boundary = index.min(text.len());
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}

/// Compact a tool result's stdout/stderr to fit `max_bytes` combined.
///
/// The budget is split proportionally to each field's original size with
/// a per-field floor. Results within budget pass through unchanged;
/// compacted results are flagged `summary = true` with the original
/// combined size recorded.
pub fn summarize_tool_result(result: &ToolResult, max_bytes: usize) -> ToolResult {
    let total = result.stdout.len() + result.stderr.len();
    if total <= max_bytes {
        return result.clone();
    }

    let stdout_budget = if result.stdout.is_empty() {
        0
    } else {
        (max_bytes * result.stdout.len() / total).max(MIN_FIELD_BUDGET)
    };
    let stderr_budget = if result.stderr.is_empty() {
        0
    } else {
        (max_bytes * result.stderr.len() / total).max(MIN_FIELD_BUDGET)
    };

    ToolResult {
        stdout: summarize_text(&result.stdout, stdout_budget),
        stderr: summarize_text(&result.stderr, stderr_budget),
        summary: true,
        original_size: Some(total),
        ..result.clone()
    }
}

/// Strip chain-of-thought delimiter blocks before persistence. The UI may
/// show them live, but history replayed to the model must not contain them.
pub fn strip_reasoning_blocks(text: &str) -> String {
    let stripped = REASONING_BLOCK.replace_all(text, "");
    DANGLING_REASONING.replace_all(&stripped, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_budget_is_identity() {
        let text = "short output\nnothing to compact";
        assert_eq!(summarize_text(text, 1024), text);
    }

    #[test]
    fn test_head_tail_split_with_marker() {
        let text = (0..500)
            .map(|i| format!("line {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let out = summarize_text(&text, 1024);

        assert!(out.len() <= 1024);
        assert!(out.starts_with("line 0"));
        assert!(out.ends_with("line 499"));
        assert!(out.contains("lines omitted"));
        assert!(out.contains(&format!("{} bytes total", text.len())));
    }

    #[test]
    fn test_few_lines_fall_back_to_prefix_truncation() {
        let text = "x".repeat(50_000);
        let out = summarize_text(&text, 1024);
        assert!(out.len() <= 1024 + MARKER_RESERVE);
        assert!(out.contains("truncated"));
    }

    #[test]
    fn test_idempotent_at_same_budget() {
        let text = (0..500)
            .map(|i| format!("line {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let once = summarize_text(&text, 2048);
        let twice = summarize_text(&once, 2048);
        assert_eq!(once, twice);

        let larger = summarize_text(&once, 65_536);
        assert_eq!(once, larger);
    }

    #[test]
    fn test_tool_result_proportional_split() {
        let result = ToolResult {
            stdout: "ok\n".repeat(5_000),
            stderr: "err\n".repeat(100),
            ..ToolResult::executed("make", "", None)
        };
        let compacted = summarize_tool_result(&result, DEFAULT_MAX_TOOL_OUTPUT_BYTES);

        assert!(compacted.summary);
        assert_eq!(
            compacted.original_size,
            Some(result.stdout.len() + result.stderr.len())
        );
        assert!(compacted.stdout.len() + compacted.stderr.len() <= DEFAULT_MAX_TOOL_OUTPUT_BYTES + MARKER_RESERVE);
        assert!(compacted.stdout.contains("lines omitted"));
        // stderr fit inside its floor budget and passed through
        assert_eq!(compacted.stderr, result.stderr);
    }

    #[test]
    fn test_tool_result_within_budget_untouched() {
        let result = ToolResult::executed("ls", "a\nb\nc", None);
        let same = summarize_tool_result(&result, DEFAULT_MAX_TOOL_OUTPUT_BYTES);
        assert!(!same.summary);
        assert_eq!(same.stdout, "a\nb\nc");
    }

    #[test]
    fn test_strip_reasoning_blocks() {
        let text = "<think>let me reason about this</think>The answer is 42.";
        assert_eq!(strip_reasoning_blocks(text), "The answer is 42.");

        let dangling = "Answer first. <think>unterminated reasoning";
        assert_eq!(strip_reasoning_blocks(dangling), "Answer first.");

        let plain = "No reasoning here.";
        assert_eq!(strip_reasoning_blocks(plain), plain);
    }
}
