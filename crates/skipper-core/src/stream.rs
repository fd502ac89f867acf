//! Incremental-event aggregation for model-response streams.
//!
//! Backends are inconsistent about event shape: the same `content` or
//! `reasoning` channel may carry incremental deltas or the full
//! accumulated text so far. All of that inference lives here — the
//! aggregator tracks the last-seen length per channel and derives the
//! delta, so callers never guess. A length decrease is treated as a new
//! message boundary.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::types::ToolResult;

/// How long the reducer waits for the next event before ending the
/// stream with whatever accumulated.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// One chunk of a model-response stream. Transient; reduced into a
/// message and tool-result list before anything is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Response text, either a delta or the accumulated text so far.
    Content { text: String },
    /// Intermediate reasoning, same dual shape as `Content`.
    Reasoning { text: String },
    /// A tool invocation the backend performed. Internal telemetry only;
    /// never forwarded to the live display.
    ToolCall {
        name: String,
        #[serde(default)]
        arguments: serde_json::Value,
    },
    /// Result of a backend-side tool invocation. `noise` marks
    /// housekeeping calls recorded for history but suppressed live.
    ToolResult {
        result: ToolResult,
        #[serde(default)]
        noise: bool,
    },
    /// A finalized message snapshot.
    Message { text: String },
    /// Backend failure; aborts the reduction.
    Error { message: String },
    /// End of stream.
    Done,
}

/// Which live channel a delta belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamChannel {
    Content,
    Reasoning,
}

/// Final product of a reduction.
#[derive(Debug, Default)]
pub struct StreamOutcome {
    /// Accumulated response text (content channel only).
    pub full_text: String,
    /// Accumulated reasoning text, kept separate so persistence can drop it.
    pub reasoning: String,
    /// Tool results in arrival order, including noise-flagged ones.
    pub tool_results: Vec<ToolResult>,
    /// Tool calls observed, for telemetry.
    pub tool_calls: Vec<String>,
}

/// Stateful reducer over [`StreamEvent`]s.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    content_len: usize,
    reasoning_len: usize,
    outcome: StreamOutcome,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns `Ok(true)` when the stream is finished.
    ///
    /// `on_delta` receives live display text; `on_tool_result` receives
    /// non-noise tool results as they arrive.
    pub fn apply(
        &mut self,
        event: StreamEvent,
        on_delta: &mut dyn FnMut(StreamChannel, &str),
        on_tool_result: &mut dyn FnMut(&ToolResult),
    ) -> Result<bool, AgentError> {
        match event {
            StreamEvent::Content { text } => {
                let delta = take_delta(&mut self.content_len, &text);
                if !delta.is_empty() {
                    self.outcome.full_text.push_str(&delta);
                    on_delta(StreamChannel::Content, &delta);
                }
            }
            StreamEvent::Reasoning { text } => {
                let delta = take_delta(&mut self.reasoning_len, &text);
                if !delta.is_empty() {
                    self.outcome.reasoning.push_str(&delta);
                    on_delta(StreamChannel::Reasoning, &delta);
                }
            }
            StreamEvent::ToolCall { name, .. } => {
                self.outcome.tool_calls.push(name);
            }
            StreamEvent::ToolResult { result, noise } => {
                if !noise {
                    on_tool_result(&result);
                }
                self.outcome.tool_results.push(result);
            }
            StreamEvent::Message { text } => {
                // A finalized snapshot may carry text the chunk stream
                // dropped; emit only the missing suffix.
                if text.len() > self.outcome.full_text.len()
                    && text.starts_with(self.outcome.full_text.as_str())
                {
                    let suffix = text[self.outcome.full_text.len()..].to_string();
                    self.outcome.full_text.push_str(&suffix);
                    self.content_len = self.outcome.full_text.len();
                    on_delta(StreamChannel::Content, &suffix);
                }
            }
            StreamEvent::Error { message } => {
                return Err(AgentError::ModelCall(message));
            }
            StreamEvent::Done => return Ok(true),
        }
        Ok(false)
    }

    pub fn finish(self) -> StreamOutcome {
        self.outcome
    }
}

/// Delta inference: when the incoming text is longer than the last-seen
/// length for its channel it is an accumulated snapshot and only the
/// suffix is new; otherwise it is an incremental chunk (or a new message
/// boundary) and is taken whole.
fn take_delta(last_len: &mut usize, text: &str) -> String {
    let delta = if text.len() > *last_len && text.is_char_boundary(*last_len) {
        text[*last_len..].to_string()
    } else {
        text.to_string()
    };
    *last_len = text.len();
    delta
}

/// Reduce a push-based event stream, invoking `on_delta` for live display
/// as chunks arrive.
///
/// Malformed or unexpected conditions on individual chunks never abort
/// the reduction; only an explicit `Error` event does. A channel that
/// goes quiet for `idle_timeout` ends the reduction with what
/// accumulated, mirroring the send-side stream timeout.
pub async fn reduce_stream(
    mut rx: mpsc::UnboundedReceiver<StreamEvent>,
    idle_timeout: Duration,
    mut on_delta: impl FnMut(StreamChannel, &str),
    mut on_tool_result: impl FnMut(&ToolResult),
) -> Result<StreamOutcome, AgentError> {
    let mut aggregator = StreamAggregator::new();

    loop {
        let event = match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(_) => {
                tracing::warn!("model stream idle for {:?}, ending reduction", idle_timeout);
                break;
            }
        };

        if aggregator.apply(event, &mut on_delta, &mut on_tool_result)? {
            break;
        }
    }

    Ok(aggregator.finish())
}

/// Reduce an already-collected event sequence.
pub fn reduce(
    events: impl IntoIterator<Item = StreamEvent>,
    mut on_delta: impl FnMut(StreamChannel, &str),
) -> Result<StreamOutcome, AgentError> {
    let mut aggregator = StreamAggregator::new();
    let mut sink = |_: &ToolResult| {};
    for event in events {
        if aggregator.apply(event, &mut on_delta, &mut sink)? {
            break;
        }
    }
    Ok(aggregator.finish())
}
