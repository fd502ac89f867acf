//! Extraction of structured plans and analysis verdicts from model text.
//!
//! Models wrap JSON in prose and markdown, and streamed responses get cut
//! off mid-payload. Extraction therefore runs in three stages: locate the
//! first balanced object with a string-aware scan, repair unclosed
//! braces/brackets/strings and re-parse, and finally regex-scan for
//! individually well-formed step records.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::types::{Plan, PlanStep};

static STEP_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\{[^{}]*?"command"[^{}]*?\}"#).expect("valid step regex"));

#[derive(Deserialize)]
struct PlanPayload {
    steps: Vec<PlanStep>,
}

/// Analysis verdict for one executed step.
#[derive(Debug, Clone, Deserialize)]
pub struct Analysis {
    #[serde(alias = "needsReplan", default)]
    pub needs_replan: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub complete: bool,
}

/// Extract a plan from free-form model output.
///
/// Returns `None` only when zero steps can be recovered.
pub fn parse_plan(text: &str) -> Option<Plan> {
    let candidate = first_object(text)?;

    if let Ok(payload) = serde_json::from_str::<PlanPayload>(candidate) {
        if !payload.steps.is_empty() {
            return Some(payload.steps);
        }
    }

    let repaired = repair_json(candidate);
    if let Ok(payload) = serde_json::from_str::<PlanPayload>(&repaired) {
        if !payload.steps.is_empty() {
            return Some(payload.steps);
        }
    }

    let steps = extract_partial_steps(text);
    if steps.is_empty() {
        None
    } else {
        Some(steps)
    }
}

/// Extract an analysis verdict. Falls back to `None` when no object parses
/// even after repair; the caller supplies deterministic defaults.
pub fn parse_analysis(text: &str) -> Option<Analysis> {
    let candidate = first_object(text)?;
    if let Ok(analysis) = serde_json::from_str::<Analysis>(candidate) {
        return Some(analysis);
    }
    serde_json::from_str::<Analysis>(&repair_json(candidate)).ok()
}

/// Locate the first `{...}` object with brace/string-aware scanning so
/// nested braces and quoted braces are handled. When the object never
/// closes (truncated payload), the unbalanced remainder is returned for
/// the repair stage.
fn first_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = &text[start..];

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in bytes.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&bytes[..idx + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    Some(bytes)
}

/// Close a dangling string and append missing `]`/`}` closers in nesting
/// order. Also drops a trailing comma left by truncation.
fn repair_json(candidate: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in candidate.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut repaired = candidate.to_string();
    if in_string {
        repaired.push('"');
    }
    let trimmed = repaired.trim_end().to_string();
    repaired = trimmed;
    if repaired.ends_with(',') {
        repaired.pop();
    }
    while let Some(closer) = stack.pop() {
        repaired.push(closer);
    }
    repaired
}

/// Scan a truncated payload for individually well-formed step records and
/// assemble whatever parsed.
fn extract_partial_steps(text: &str) -> Vec<PlanStep> {
    STEP_OBJECT
        .find_iter(text)
        .filter_map(|m| serde_json::from_str::<PlanStep>(m.as_str()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_well_formed_plan() {
        let text = r#"Here is the plan:
{"steps": [
  {"step": 1, "command": "uname -a", "purpose": "identify the system"},
  {"step": 2, "command": "df -h", "purpose": "check disk usage"},
  {"step": 3, "command": "free -m", "purpose": "check memory"}
]}
Let me know."#;
        let plan = parse_plan(text).expect("plan should parse");
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].command, "uname -a");
        assert_eq!(plan[2].step, 3);
    }

    #[test]
    fn test_handles_nested_and_quoted_braces() {
        let text = r#"{"steps": [{"step": 1, "command": "awk '{print $1}' data.txt", "purpose": "first column"}]}"#;
        let plan = parse_plan(text).expect("plan should parse");
        assert_eq!(plan[0].command, "awk '{print $1}' data.txt");
    }

    #[test]
    fn test_repairs_truncated_payload() {
        let text = r#"{"steps": [
  {"step": 1, "command": "uname -a", "purpose": "identify the system"},
  {"step": 2, "command": "df -h", "purpose": "check disk"#;
        let plan = parse_plan(text).expect("repair should recover steps");
        assert!(!plan.is_empty());
        assert_eq!(plan[0].command, "uname -a");
    }

    #[test]
    fn test_partial_extraction_when_repair_fails() {
        // Truncated mid-key: repair cannot make this valid, but the first
        // step record is individually well-formed.
        let text = r#"{"steps": [
  {"step": 1, "command": "uname -a", "purpose": "identify the system"},
  {"step": 2, "comm"#;
        let plan = parse_plan(text).expect("partial extraction should recover");
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].command, "uname -a");
    }

    #[test]
    fn test_returns_none_for_hopeless_input() {
        assert!(parse_plan("I cannot produce a plan right now.").is_none());
        assert!(parse_plan("{\"steps\": []}").is_none());
    }

    #[test]
    fn test_parse_analysis() {
        let verdict =
            parse_analysis(r#"{"needsReplan": true, "reason": "disk probe failed", "complete": false}"#)
                .expect("analysis should parse");
        assert!(verdict.needs_replan);
        assert_eq!(verdict.reason, "disk probe failed");
        assert!(!verdict.complete);
    }

    #[test]
    fn test_parse_analysis_snake_case_and_truncated() {
        let verdict = parse_analysis(r#"{"needs_replan": false, "complete": true, "reason": "done"#)
            .expect("repair should recover analysis");
        assert!(verdict.complete);
    }
}
