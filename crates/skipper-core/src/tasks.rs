//! Per-conversation task lifecycle: at most one running task per
//! conversation, cooperative cancellation, and filtering of events from
//! conversations the user has navigated away from.

use std::future::Future;
use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentEvent, TaskOutcome};
use crate::error::AgentError;

/// Tracks which conversations have a task in flight.
///
/// `begin` is the only way to obtain a token, so holding one proves the
/// conversation slot is owned. `finish` releases the slot; [`spawn`]
/// wraps both ends so callers cannot leak a slot on an early return.
#[derive(Default)]
pub struct TaskTracker {
    running: DashMap<String, CancellationToken>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the conversation slot and returns its cancellation token.
    pub fn begin(&self, conversation_id: &str) -> Result<CancellationToken, AgentError> {
        match self.running.entry(conversation_id.to_string()) {
            Entry::Occupied(_) => Err(AgentError::Busy(conversation_id.to_string())),
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                slot.insert(token.clone());
                Ok(token)
            }
        }
    }

    pub fn is_processing(&self, conversation_id: &str) -> bool {
        self.running.contains_key(conversation_id)
    }

    /// Signals the running task, if any. Returns whether one was found.
    /// The slot stays claimed until the task observes the token and its
    /// guard calls `finish`.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        match self.running.get(conversation_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn finish(&self, conversation_id: &str) {
        self.running.remove(conversation_id);
    }
}

/// Releases the tracker slot when dropped, covering panics and early
/// returns inside the task body.
struct FinishGuard {
    tracker: Arc<TaskTracker>,
    conversation_id: String,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.tracker.finish(&self.conversation_id);
    }
}

/// Claims the conversation slot, spawns the task body, and returns the
/// event stream for the UI to drain.
///
/// The body receives the event sender and the cancellation token. Its
/// result is folded into the stream: `Cancelled` becomes a terminal
/// `Completed { cancelled: true }`, any other error a terminal `Error`.
/// Successful bodies are expected to emit their own `Completed`.
pub fn spawn<F, Fut>(
    tracker: Arc<TaskTracker>,
    conversation_id: String,
    body: F,
) -> Result<mpsc::UnboundedReceiver<AgentEvent>, AgentError>
where
    F: FnOnce(mpsc::UnboundedSender<AgentEvent>, CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<TaskOutcome, AgentError>> + Send + 'static,
{
    let token = tracker.begin(&conversation_id)?;
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let _guard = FinishGuard {
            tracker,
            conversation_id: conversation_id.clone(),
        };
        match body(tx.clone(), token.clone()).await {
            Ok(outcome) if outcome.cancelled || token.is_cancelled() => {
                let _ = tx.send(AgentEvent::Completed {
                    conversation_id,
                    report: "Task cancelled.".to_string(),
                    cancelled: true,
                });
            }
            Ok(_) => {}
            Err(AgentError::Cancelled) => {
                let _ = tx.send(AgentEvent::Completed {
                    conversation_id,
                    report: "Task cancelled.".to_string(),
                    cancelled: true,
                });
            }
            Err(e) => {
                tracing::error!(conversation_id = %conversation_id, "task failed: {}", e);
                let _ = tx.send(AgentEvent::Error {
                    conversation_id,
                    error: e.to_string(),
                });
            }
        }
    });

    Ok(rx)
}

/// Tracks which conversation the UI is currently showing so events from
/// background tasks can be dropped instead of rendered.
#[derive(Default)]
pub struct ActiveFilter {
    active: Mutex<Option<String>>,
}

impl ActiveFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&self, conversation_id: Option<String>) {
        *self.active.lock() = conversation_id;
    }

    /// Whether an event belongs to the conversation on screen.
    pub fn accepts(&self, event: &AgentEvent) -> bool {
        match self.active.lock().as_deref() {
            Some(active) => event.conversation_id() == active,
            None => false,
        }
    }
}
