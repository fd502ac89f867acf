//! Deliberative strategy: plan → execute → analyze → replan.
//!
//! Outer iterations are bounded; each one walks the current plan unless
//! an analysis verdict interrupts it with a replan or completion. Every
//! model-dependent stage has a deterministic fallback, so the loop only
//! ever fails upward when the transport is gone.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::capabilities::{CommandRunner, ModelClient};
use crate::error::AgentError;
use crate::osdetect::{self, OsType};
use crate::parse::{parse_analysis, parse_plan, Analysis};
use crate::safety;
use crate::stream::{self, StreamChannel};
use crate::types::{Plan, PlanStep, ToolResult};

use super::events::AgentEvent;
use super::prompts;
use super::state::AgentState;
use super::{emit, run_command, save_assistant_message, save_tool_message, TaskOutcome};

const DEFAULT_MAX_ITERATIONS: usize = 20;
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct DeliberativeConfig {
    pub max_iterations: usize,
    pub command_timeout: Duration,
}

impl Default for DeliberativeConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// The plan/execute/analyze/replan loop.
pub struct DeliberativeAgent {
    model: Arc<dyn ModelClient>,
    runner: Arc<dyn CommandRunner>,
    config: DeliberativeConfig,
    db_path: Option<PathBuf>,
}

impl DeliberativeAgent {
    pub fn new(model: Arc<dyn ModelClient>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            model,
            runner,
            config: DeliberativeConfig::default(),
            db_path: None,
        }
    }

    pub fn with_config(mut self, config: DeliberativeConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist steps and the final report to this conversation store.
    pub fn with_store(mut self, db_path: PathBuf) -> Self {
        self.db_path = Some(db_path);
        self
    }

    /// Run the task to completion (or cancellation).
    pub async fn run(
        &self,
        conversation_id: &str,
        goal: &str,
        events: &mpsc::UnboundedSender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, AgentError> {
        let mut state = AgentState::new(self.config.max_iterations);
        state.os_type = osdetect::detect(self.runner.as_ref()).await?;

        let mut plan = self.build_initial_plan(goal, &state).await;
        emit(
            events,
            cancel,
            AgentEvent::PlanReady {
                conversation_id: conversation_id.to_string(),
                steps: plan.clone(),
            },
        );

        let mut completed = false;

        'outer: while state.iteration < state.max_iterations {
            if cancel.is_cancelled() {
                return Ok(TaskOutcome::cancelled(state));
            }
            state.iteration += 1;
            let mut replanned = false;

            for step in plan.clone() {
                if cancel.is_cancelled() {
                    return Ok(TaskOutcome::cancelled(state));
                }

                if let Some(reason) = safety::dangerous_reason(&step.command) {
                    tracing::warn!(command = %step.command, reason, "command blocked");
                    state.record_blocked(&step.command, reason);
                    let result = ToolResult::blocked(&step.command, reason);
                    emit(
                        events,
                        cancel,
                        AgentEvent::StepBlocked {
                            conversation_id: conversation_id.to_string(),
                            command: step.command.clone(),
                            reason: reason.to_string(),
                        },
                    );
                    if !cancel.is_cancelled() {
                        save_tool_message(self.db_path.as_deref(), conversation_id, &result);
                    }
                    continue;
                }

                emit(
                    events,
                    cancel,
                    AgentEvent::StepStarted {
                        conversation_id: conversation_id.to_string(),
                        iteration: state.iteration,
                        step: step.step,
                        purpose: step.purpose.clone(),
                        command: step.command.clone(),
                    },
                );

                let (output, error) =
                    run_command(self.runner.as_ref(), &step.command, self.config.command_timeout)
                        .await?;
                state.record(&step.command, &output, error.clone());
                if state.os_type == OsType::Unknown {
                    state.os_type = OsType::infer_from_text(&output);
                }

                let result = ToolResult::executed(&step.command, &output, error.as_deref());
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

                let verdict = self
                    .analyze(goal, &step, &output, error.as_deref())
                    .await;
                emit(
                    events,
                    cancel,
                    AgentEvent::Analysis {
                        conversation_id: conversation_id.to_string(),
                        needs_replan: verdict.needs_replan,
                        reason: verdict.reason.clone(),
                        complete: verdict.complete,
                    },
                );

                if verdict.complete {
                    completed = true;
                    break 'outer;
                }
                if verdict.needs_replan {
                    emit(
                        events,
                        cancel,
                        AgentEvent::Replanning {
                            conversation_id: conversation_id.to_string(),
                            reason: verdict.reason.clone(),
                        },
                    );
                    plan = self.replan(goal, &verdict.reason, &state).await;
                    emit(
                        events,
                        cancel,
                        AgentEvent::PlanReady {
                            conversation_id: conversation_id.to_string(),
                            steps: plan.clone(),
                        },
                    );
                    replanned = true;
                    break;
                }
            }

            // Plan exhausted without a replan request: the task is done.
            if !replanned {
                completed = true;
                break;
            }
        }

        if cancel.is_cancelled() {
            return Ok(TaskOutcome::cancelled(state));
        }

        let report = self
            .final_report(conversation_id, goal, &state, completed, events, cancel)
            .await;
        save_assistant_message(self.db_path.as_deref(), conversation_id, &report);
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

    async fn build_initial_plan(&self, goal: &str, state: &AgentState) -> Plan {
        match self.model.call(&prompts::planning_prompt(goal, state)).await {
            Ok(text) => match parse_plan(&text) {
                Some(plan) => plan,
                None => {
                    tracing::warn!("planning response had no recoverable plan, using probe fallback");
                    fallback_plan(state.os_type)
                }
            },
            Err(e) => {
                tracing::warn!("planning call failed ({}), using probe fallback", e);
                fallback_plan(state.os_type)
            }
        }
    }

    async fn analyze(
        &self,
        goal: &str,
        step: &PlanStep,
        output: &str,
        error: Option<&str>,
    ) -> Analysis {
        let prompt = prompts::analysis_prompt(goal, &step.command, output, error);
        match self.model.call(&prompt).await {
            Ok(text) => match parse_analysis(&text) {
                Some(verdict) => verdict,
                None => default_verdict(error),
            },
            Err(e) => {
                tracing::warn!("analysis call failed ({}), using default verdict", e);
                default_verdict(error)
            }
        }
    }

    async fn replan(&self, goal: &str, reason: &str, state: &AgentState) -> Plan {
        let prompt = prompts::replanning_prompt(goal, reason, state);
        match self.model.call(&prompt).await {
            Ok(text) => {
                if let Some(plan) = parse_plan(&text) {
                    return plan;
                }
                tracing::warn!("replanning response had no recoverable plan, using minimal step");
                minimal_replan(state)
            }
            Err(e) => {
                tracing::warn!("replanning call failed ({}), using minimal step", e);
                minimal_replan(state)
            }
        }
    }

    /// The report is the one model response the user watches arrive, so
    /// it goes through the streaming path, with live deltas forwarded as
    /// events and the reduced text used as the report.
    async fn final_report(
        &self,
        conversation_id: &str,
        goal: &str,
        state: &AgentState,
        completed: bool,
        events: &mpsc::UnboundedSender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> String {
        let prompt = prompts::report_prompt(goal, state);
        let streamed = match self.model.call_streaming(&prompt).await {
            Ok(rx) => {
                stream::reduce_stream(
                    rx,
                    stream::DEFAULT_IDLE_TIMEOUT,
                    |channel, delta| {
                        let event = match channel {
                            StreamChannel::Content => AgentEvent::TextDelta {
                                conversation_id: conversation_id.to_string(),
                                delta: delta.to_string(),
                            },
                            StreamChannel::Reasoning => AgentEvent::ReasoningDelta {
                                conversation_id: conversation_id.to_string(),
                                delta: delta.to_string(),
                            },
                        };
                        emit(events, cancel, event);
                    },
                    |result| {
                        emit(
                            events,
                            cancel,
                            AgentEvent::ToolResult {
                                conversation_id: conversation_id.to_string(),
                                result: result.clone(),
                            },
                        );
                    },
                )
                .await
                .map(|outcome| outcome.full_text)
            }
            Err(e) => Err(e),
        };

        match streamed {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => fallback_report(state, completed),
            Err(e) => {
                tracing::warn!("report call failed ({}), using summary fallback", e);
                fallback_report(state, completed)
            }
        }
    }
}

/// When no plan can be recovered at all, probe the system instead of
/// aborting; the analysis stage takes it from there.
fn fallback_plan(os: OsType) -> Plan {
    match os {
        OsType::Windows => vec![
            PlanStep {
                step: 1,
                command: "ver".to_string(),
                purpose: "Identify the system".to_string(),
            },
            PlanStep {
                step: 2,
                command: "cd".to_string(),
                purpose: "Show the current directory".to_string(),
            },
        ],
        _ => vec![
            PlanStep {
                step: 1,
                command: "uname -a".to_string(),
                purpose: "Identify the system".to_string(),
            },
            PlanStep {
                step: 2,
                command: "pwd".to_string(),
                purpose: "Show the current directory".to_string(),
            },
        ],
    }
}

fn minimal_replan(state: &AgentState) -> Plan {
    let next = state
        .command_history
        .len()
        .max(state.iteration) as u32
        + 1;
    vec![PlanStep {
        step: next,
        command: if state.os_type == OsType::Windows {
            "dir".to_string()
        } else {
            "ls -la".to_string()
        },
        purpose: "Continue investigating".to_string(),
    }]
}

fn fallback_report(state: &AgentState, completed: bool) -> String {
    format!(
        "Task {} after {} command(s). See the step history for details.",
        if completed {
            "finished"
        } else {
            "stopped at the iteration limit"
        },
        state.command_history.len()
    )
}

fn default_verdict(error: Option<&str>) -> Analysis {
    Analysis {
        needs_replan: error.is_some(),
        reason: error.map(|e| format!("step failed: {}", e)).unwrap_or_default(),
        complete: false,
    }
}
