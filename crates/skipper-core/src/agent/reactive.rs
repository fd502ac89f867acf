//! Reactive (ReAct) strategy: thought → command → real observation.
//!
//! One command per model call. The model never supplies its own
//! observation; the loop injects the true one after execution and
//! rebuilds the full transcript as context for the next call. A blocked
//! command's notice becomes the observation for that step, so the model
//! can route around it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::capabilities::{CommandRunner, ModelClient};
use crate::error::{AgentError, ParseError};
use crate::osdetect::{self, OsType};
use crate::parse::{parse_agent_response, AgentReply};
use crate::safety;
use crate::types::ToolResult;

use super::events::AgentEvent;
use super::prompts;
use super::state::AgentState;
use super::{emit, run_command, save_assistant_message, save_tool_message, TaskOutcome};

const DEFAULT_MAX_ITERATIONS: usize = 10;
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
/// Pause between steps so the remote channel is not hammered.
const DEFAULT_STEP_DELAY: Duration = Duration::from_millis(750);

#[derive(Debug, Clone)]
pub struct ReactiveConfig {
    pub max_iterations: usize,
    pub command_timeout: Duration,
    pub step_delay: Duration,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            step_delay: DEFAULT_STEP_DELAY,
        }
    }
}

/// One completed thought/command/observation cycle.
#[derive(Debug, Clone)]
pub struct ReactTurn {
    pub thought: String,
    pub command: String,
    pub observation: String,
}

/// The thought/action/observation loop.
pub struct ReactiveAgent {
    model: Arc<dyn ModelClient>,
    runner: Arc<dyn CommandRunner>,
    config: ReactiveConfig,
    db_path: Option<PathBuf>,
}

impl ReactiveAgent {
    pub fn new(model: Arc<dyn ModelClient>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            model,
            runner,
            config: ReactiveConfig::default(),
            db_path: None,
        }
    }

    pub fn with_config(mut self, config: ReactiveConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, db_path: PathBuf) -> Self {
        self.db_path = Some(db_path);
        self
    }

    pub async fn run(
        &self,
        conversation_id: &str,
        goal: &str,
        events: &mpsc::UnboundedSender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, AgentError> {
        let mut state = AgentState::new(self.config.max_iterations);
        state.os_type = osdetect::detect(self.runner.as_ref()).await?;

        let mut turns: Vec<ReactTurn> = Vec::new();
        let mut report: Option<String> = None;

        while state.iteration < state.max_iterations {
            if cancel.is_cancelled() {
                return Ok(TaskOutcome::cancelled(state));
            }
            state.iteration += 1;

            let prompt = prompts::react_prompt(goal, &state, &turns);
            let text = match self.model.call(&prompt).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("model call failed mid-task: {}", e);
                    report = Some(format!(
                        "Stopped after {} step(s): the model backend became unavailable.",
                        turns.len()
                    ));
                    break;
                }
            };

            let reply = match parse_agent_response(&text) {
                Ok(reply) => reply,
                Err(ParseError::NoCommandFound) | Err(ParseError::NoPlanFound) => {
                    // Feed the format back as an observation so the model
                    // self-corrects on the next call.
                    turns.push(ReactTurn {
                        thought: text.trim().to_string(),
                        command: "(none)".to_string(),
                        observation:
                            "No command was recognized. Reply with 'Thought:' and 'Command:' lines."
                                .to_string(),
                    });
                    continue;
                }
            };

            emit(
                events,
                cancel,
                AgentEvent::Thought {
                    conversation_id: conversation_id.to_string(),
                    iteration: state.iteration,
                    thought: reply.thought.clone(),
                },
            );

            if reply.is_complete {
                report = Some(if reply.thought.is_empty() {
                    "Task complete.".to_string()
                } else {
                    reply.thought.clone()
                });
                save_assistant_message(self.db_path.as_deref(), conversation_id, &reply.thought);
                break;
            }

            // parse guarantees a command when not complete
            let Some(command) = reply.command.clone() else {
                continue;
            };
            save_assistant_message(
                self.db_path.as_deref(),
                conversation_id,
                &render_turn(&reply),
            );

            let observation = if let Some(reason) = safety::dangerous_reason(&command) {
                tracing::warn!(command = %command, reason, "command blocked");
                state.record_blocked(&command, reason);
                let result = ToolResult::blocked(&command, reason);
                emit(
                    events,
                    cancel,
                    AgentEvent::StepBlocked {
                        conversation_id: conversation_id.to_string(),
                        command: command.clone(),
                        reason: reason.to_string(),
                    },
                );
                if !cancel.is_cancelled() {
                    save_tool_message(self.db_path.as_deref(), conversation_id, &result);
                }
                format!("Command blocked by the safety filter: {}.", reason)
            } else {
                if cancel.is_cancelled() {
                    return Ok(TaskOutcome::cancelled(state));
                }
                let (output, error) =
                    run_command(self.runner.as_ref(), &command, self.config.command_timeout)
                        .await?;
                state.record(&command, &output, error.clone());
                if state.os_type == OsType::Unknown {
                    state.os_type = OsType::infer_from_text(&output);
                }

                let result = ToolResult::executed(&command, &output, error.as_deref());
                emit(
                    events,
                    cancel,
                    AgentEvent::StepCompleted {
                        conversation_id: conversation_id.to_string(),
                        iteration: state.iteration,
                        result: result.clone(),
                    },
                );
                if !cancel.is_cancelled() {
                    save_tool_message(self.db_path.as_deref(), conversation_id, &result);
                }

                match &error {
                    Some(e) if output.is_empty() => format!("(error) {}", e),
                    Some(e) => format!("{}\n(error) {}", output, e),
                    None if output.is_empty() => "(no output)".to_string(),
                    None => output.clone(),
                }
            };

            emit(
                events,
                cancel,
                AgentEvent::Observation {
                    conversation_id: conversation_id.to_string(),
                    iteration: state.iteration,
                    output: observation.clone(),
                },
            );

            turns.push(ReactTurn {
                thought: reply.thought,
                command,
                observation,
            });

            tokio::time::sleep(self.config.step_delay).await;
        }

        if cancel.is_cancelled() {
            return Ok(TaskOutcome::cancelled(state));
        }

        let report = report.unwrap_or_else(|| {
            format!(
                "Reached the iteration limit after {} step(s) without an explicit completion.",
                turns.len()
            )
        });
        emit(
            events,
            cancel,
            AgentEvent::Completed {
                conversation_id: conversation_id.to_string(),
                report: report.clone(),
                cancelled: false,
            },
        );

        Ok(TaskOutcome {
            report,
            cancelled: false,
            state,
        })
    }
}

fn render_turn(reply: &AgentReply) -> String {
    match &reply.command {
        Some(command) => format!("Thought: {}\nCommand: {}", reply.thought, command),
        None => reply.thought.clone(),
    }
}
