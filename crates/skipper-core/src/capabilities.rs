//! Capability traits the orchestrator consumes.
//!
//! The remote shell and the model backend are external collaborators.
//! They are injected behind these traits so the loops can be driven by a
//! live SSH channel and an HTTP model client in production, and by
//! scripted mocks in tests.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::stream::StreamEvent;

/// Output of one remote command execution.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub output: String,
    pub error: Option<String>,
}

/// A live, already-connected command channel.
///
/// Implementations must not block indefinitely; the orchestrator applies
/// its own per-command timeout on top.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(&self, command: &str) -> Result<CommandOutput, AgentError>;
}

/// A model backend.
///
/// `call` returns the complete response text. `call_streaming` delivers
/// typed incremental events instead; the default implementation wraps
/// `call` in a single content chunk for backends without streaming.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn call(&self, prompt: &str) -> Result<String, AgentError>;

    async fn call_streaming(
        &self,
        prompt: &str,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>, AgentError> {
        let text = self.call(prompt).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(StreamEvent::Content { text });
        let _ = tx.send(StreamEvent::Done);
        Ok(rx)
    }
}
