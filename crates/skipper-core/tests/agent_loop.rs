//! End-to-end loop tests with a scripted model and an in-process runner.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use skipper_core::agent::{
    AgentEvent, DeliberativeAgent, DeliberativeConfig, ReactiveAgent, ReactiveConfig,
};
use skipper_core::capabilities::{CommandOutput, CommandRunner, ModelClient};
use skipper_core::error::AgentError;
use skipper_core::storage::{ConversationStore, Database};
use skipper_core::tasks::{self, TaskTracker};
use skipper_core::types::ChatRole;

/// Pops scripted responses in call order.
struct ScriptedModel {
    responses: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().rev().map(|s| s.to_string()).collect()),
        })
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn call(&self, _prompt: &str) -> Result<String, AgentError> {
        self.responses
            .lock()
            .pop()
            .ok_or_else(|| AgentError::ModelCall("script exhausted".to_string()))
    }
}

/// Answers known commands from a table and records everything executed.
struct FakeRunner {
    outputs: HashMap<String, String>,
    executed: Mutex<Vec<String>>,
}

impl FakeRunner {
    fn new(outputs: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            outputs: outputs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            executed: Mutex::new(Vec::new()),
        })
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn execute(&self, command: &str) -> Result<CommandOutput, AgentError> {
        self.executed.lock().push(command.to_string());
        Ok(CommandOutput {
            output: self
                .outputs
                .get(command)
                .cloned()
                .unwrap_or_else(|| format!("ran: {}", command)),
            error: None,
        })
    }
}

/// Answers known commands, hangs forever on anything else until
/// cancelled from outside.
struct StalledRunner {
    outputs: HashMap<String, String>,
}

impl StalledRunner {
    fn new(outputs: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            outputs: outputs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
    }
}

#[async_trait]
impl CommandRunner for StalledRunner {
    async fn execute(&self, command: &str) -> Result<CommandOutput, AgentError> {
        if let Some(output) = self.outputs.get(command) {
            return Ok(CommandOutput {
                output: output.clone(),
                error: None,
            });
        }
        std::future::pending::<()>().await;
        unreachable!()
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

const PLAN: &str = r#"Here is the plan:
{"steps": [
  {"step": 1, "command": "df -h", "purpose": "Check disk usage"},
  {"step": 2, "command": "du -sh /var/log", "purpose": "Measure log volume"}
]}"#;

#[tokio::test]
async fn deliberative_plan_runs_in_one_outer_iteration() {
    let model = ScriptedModel::new(&[
        PLAN,
        r#"{"needsReplan": false, "reason": "", "complete": false}"#,
        r#"{"needsReplan": false, "reason": "", "complete": true}"#,
        "Disk usage is healthy; /var/log holds 120M.",
    ]);
    let runner = FakeRunner::new(&[
        ("uname -s", "Linux"),
        ("df -h", "/dev/sda1  40G  12G  28G  30% /"),
        ("du -sh /var/log", "120M\t/var/log"),
    ]);

    let agent = DeliberativeAgent::new(model, runner.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let outcome = agent.run("c1", "check disk usage", &tx, &cancel).await.unwrap();

    assert!(!outcome.cancelled);
    assert_eq!(outcome.report, "Disk usage is healthy; /var/log holds 120M.");
    // Walking an N-step plan consumes a single outer iteration.
    assert_eq!(outcome.state.iteration, 1);
    assert_eq!(
        runner.executed(),
        vec!["uname -s", "df -h", "du -sh /var/log"]
    );

    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(AgentEvent::PlanReady { steps, .. }) if steps.len() == 2));
    assert!(matches!(
        events.last(),
        Some(AgentEvent::Completed { cancelled: false, .. })
    ));
    let completed_steps = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::StepCompleted { .. }))
        .count();
    assert_eq!(completed_steps, 2);
}

#[tokio::test]
async fn deliberative_completes_when_plan_is_exhausted() {
    // No analysis ever declares completion or asks for a replan;
    // walking off the end of the plan must terminate the task by
    // itself, still within a single outer iteration.
    let model = ScriptedModel::new(&[
        PLAN,
        r#"{"needsReplan": false, "reason": "", "complete": false}"#,
        r#"{"needsReplan": false, "reason": "", "complete": false}"#,
        "Both checks ran; nothing needed follow-up.",
    ]);
    let runner = FakeRunner::new(&[
        ("uname -s", "Linux"),
        ("df -h", "/dev/sda1  40G  12G  28G  30% /"),
        ("du -sh /var/log", "120M\t/var/log"),
    ]);

    let agent = DeliberativeAgent::new(model, runner.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let outcome = agent.run("c1", "check disk usage", &tx, &cancel).await.unwrap();

    assert!(!outcome.cancelled);
    assert_eq!(outcome.state.iteration, 1);
    assert_eq!(outcome.report, "Both checks ran; nothing needed follow-up.");
    assert_eq!(
        runner.executed(),
        vec!["uname -s", "df -h", "du -sh /var/log"]
    );

    let events = drain(&mut rx);
    assert!(matches!(
        events.last(),
        Some(AgentEvent::Completed { cancelled: false, .. })
    ));
}

#[tokio::test]
async fn deliberative_blocks_dangerous_step_and_continues() {
    let model = ScriptedModel::new(&[
        r#"{"steps": [
            {"step": 1, "command": "rm -rf /", "purpose": "Clean everything"},
            {"step": 2, "command": "echo ok", "purpose": "Confirm shell works"}
        ]}"#,
        r#"{"needsReplan": false, "reason": "", "complete": true}"#,
        "Done.",
    ]);
    let runner = FakeRunner::new(&[("uname -s", "Linux"), ("echo ok", "ok")]);

    let agent = DeliberativeAgent::new(model, runner.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let outcome = agent.run("c1", "clean up", &tx, &cancel).await.unwrap();
    assert!(!outcome.cancelled);

    // The dangerous step never reached the runner.
    assert_eq!(runner.executed(), vec!["uname -s", "echo ok"]);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::StepBlocked { command, .. } if command == "rm -rf /"
    )));
}

#[tokio::test]
async fn deliberative_replans_then_finishes() {
    let model = ScriptedModel::new(&[
        r#"{"steps": [{"step": 1, "command": "cat /etc/app.conf", "purpose": "Read config"}]}"#,
        r#"{"needsReplan": true, "reason": "file does not exist", "complete": false}"#,
        r#"{"steps": [{"step": 2, "command": "ls /etc", "purpose": "Find the config file"}]}"#,
        r#"{"needsReplan": false, "reason": "", "complete": true}"#,
        "Found it under /etc.",
    ]);
    let runner = FakeRunner::new(&[
        ("uname -s", "Linux"),
        ("cat /etc/app.conf", "No such file or directory"),
        ("ls /etc", "app.conf.example hosts passwd"),
    ]);

    let agent = DeliberativeAgent::new(model, runner.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let outcome = agent.run("c1", "read the app config", &tx, &cancel).await.unwrap();
    assert_eq!(outcome.report, "Found it under /etc.");
    assert_eq!(outcome.state.iteration, 2);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, AgentEvent::Replanning { .. })));
    let plans = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::PlanReady { .. }))
        .count();
    assert_eq!(plans, 2);
}

#[tokio::test]
async fn deliberative_persists_steps_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let db_path: PathBuf = dir.path().join("skipper.db");

    let conversation_id = {
        let store = ConversationStore::new(Database::new(&db_path).unwrap());
        store.create_conversation(None, None).unwrap().id
    };

    let model = ScriptedModel::new(&[
        r#"{"steps": [{"step": 1, "command": "uptime", "purpose": "Check load"}]}"#,
        r#"{"needsReplan": false, "reason": "", "complete": true}"#,
        "Load is low.",
    ]);
    let runner = FakeRunner::new(&[("uname -s", "Linux"), ("uptime", "up 3 days, load 0.12")]);

    let agent = DeliberativeAgent::new(model, runner).with_store(db_path.clone());
    let (tx, _rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    agent.run(&conversation_id, "check load", &tx, &cancel).await.unwrap();

    let store = ConversationStore::new(Database::new(&db_path).unwrap());
    let history = store.history(&conversation_id, None).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, ChatRole::Tool);
    assert_eq!(history[0].tool_results[0].command.as_deref(), Some("uptime"));
    assert_eq!(history[1].role, ChatRole::Assistant);
    assert_eq!(history[1].content, "Load is low.");
}

#[tokio::test]
async fn reactive_completes_on_token() {
    let model = ScriptedModel::new(&[
        "Thought: list the directory first\nCommand: ls -la",
        "Thought: the target file is present, nothing else to do\nTASK_COMPLETE",
    ]);
    let runner = FakeRunner::new(&[
        ("uname -s", "Linux"),
        ("ls -la", "total 8\n-rw-r--r-- 1 root root 42 notes.txt"),
    ]);

    let config = ReactiveConfig {
        step_delay: Duration::from_millis(0),
        ..ReactiveConfig::default()
    };
    let agent = ReactiveAgent::new(model, runner.clone()).with_config(config);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let outcome = agent.run("c1", "find notes.txt", &tx, &cancel).await.unwrap();
    assert!(!outcome.cancelled);
    assert_eq!(outcome.report, "the target file is present, nothing else to do");
    assert_eq!(runner.executed(), vec!["uname -s", "ls -la"]);

    let events = drain(&mut rx);
    let observations: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Observation { output, .. } => Some(output.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(observations.len(), 1);
    assert!(observations[0].contains("notes.txt"));
}

#[tokio::test]
async fn reactive_recovers_from_unparseable_reply() {
    let model = ScriptedModel::new(&[
        "Sure! I can help you with that task.",
        "Thought: try again with the expected format\nCommand: whoami",
        "Thought: confirmed the user\nTASK_COMPLETE",
    ]);
    let runner = FakeRunner::new(&[("uname -s", "Linux"), ("whoami", "root")]);

    let config = ReactiveConfig {
        step_delay: Duration::from_millis(0),
        ..ReactiveConfig::default()
    };
    let agent = ReactiveAgent::new(model, runner.clone()).with_config(config);
    let (tx, _rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let outcome = agent.run("c1", "who am i", &tx, &cancel).await.unwrap();
    assert!(!outcome.cancelled);
    assert_eq!(runner.executed(), vec!["uname -s", "whoami"]);
}

#[tokio::test]
async fn cancellation_stops_the_task_and_frees_the_slot() {
    let model = ScriptedModel::new(&[
        r#"{"steps": [{"step": 1, "command": "sleep forever", "purpose": "Stall"}]}"#,
    ]);
    let runner = StalledRunner::new(&[("uname -s", "Linux")]);

    let tracker = Arc::new(TaskTracker::new());
    let mut rx = tasks::spawn(tracker.clone(), "c1".to_string(), move |tx, cancel| {
        let agent = DeliberativeAgent::new(model, runner).with_config(DeliberativeConfig {
            command_timeout: Duration::from_secs(60),
            ..DeliberativeConfig::default()
        });
        async move {
            tokio::select! {
                out = agent.run("c1", "stall", &tx, &cancel) => out,
                _ = cancel.cancelled() => Err(AgentError::Cancelled),
            }
        }
    })
    .unwrap();

    assert!(tracker.is_processing("c1"));
    // A second task for the same conversation is rejected while this
    // one is in flight.
    assert!(matches!(tracker.begin("c1"), Err(AgentError::Busy(_))));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(tracker.cancel("c1"));

    let mut saw_cancelled = false;
    while let Some(event) = rx.recv().await {
        if let AgentEvent::Completed { cancelled, .. } = event {
            saw_cancelled = cancelled;
        }
    }
    assert!(saw_cancelled);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!tracker.is_processing("c1"));
    assert!(tracker.begin("c1").is_ok());
}

#[tokio::test]
async fn cancellation_stops_further_persisted_writes() {
    let dir = tempfile::tempdir().unwrap();
    let db_path: PathBuf = dir.path().join("skipper.db");
    let conversation_id = {
        let store = ConversationStore::new(Database::new(&db_path).unwrap());
        store.create_conversation(None, None).unwrap().id
    };

    let model = ScriptedModel::new(&[
        r#"{"steps": [
            {"step": 1, "command": "echo one", "purpose": "First step"},
            {"step": 2, "command": "sleep forever", "purpose": "Stall"}
        ]}"#,
        r#"{"needsReplan": false, "reason": "", "complete": false}"#,
    ]);
    let runner = StalledRunner::new(&[("uname -s", "Linux"), ("echo one", "one")]);

    let tracker = Arc::new(TaskTracker::new());
    let db_for_task = db_path.clone();
    let id_for_task = conversation_id.clone();
    let mut rx = tasks::spawn(tracker.clone(), conversation_id.clone(), move |tx, cancel| {
        let agent = DeliberativeAgent::new(model, runner)
            .with_config(DeliberativeConfig {
                command_timeout: Duration::from_secs(60),
                ..DeliberativeConfig::default()
            })
            .with_store(db_for_task);
        async move {
            tokio::select! {
                out = agent.run(&id_for_task, "stall", &tx, &cancel) => out,
                _ = cancel.cancelled() => Err(AgentError::Cancelled),
            }
        }
    })
    .unwrap();

    // Wait for the first step's result to land, then cancel while the
    // second step is stalled.
    let store = ConversationStore::new(Database::new(&db_path).unwrap());
    for _ in 0..500 {
        if store.history(&conversation_id, None).unwrap().len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.history(&conversation_id, None).unwrap().len(), 1);
    assert!(tracker.cancel(&conversation_id));

    let mut saw_cancelled = false;
    while let Some(event) = rx.recv().await {
        if let AgentEvent::Completed { cancelled, .. } = event {
            saw_cancelled = cancelled;
        }
    }
    assert!(saw_cancelled);

    // Nothing persisted past the cancellation point: no second step
    // result, no final report.
    let history = store.history(&conversation_id, None).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, ChatRole::Tool);
    assert_eq!(history[0].tool_results[0].command.as_deref(), Some("echo one"));
}
