//! Transient per-execution agent state.
//!
//! Not persisted as its own entity; it folds into messages and tool
//! results as the task runs.

use chrono::{DateTime, Utc};

use crate::osdetect::OsType;

/// One executed (or attempted) command and what came back.
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub command: String,
    pub output: String,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Working state for one task execution.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub os_type: OsType,
    pub current_directory: String,
    pub iteration: usize,
    pub max_iterations: usize,
    pub command_history: Vec<CommandRecord>,
}

impl AgentState {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            os_type: OsType::Unknown,
            current_directory: "~".to_string(),
            iteration: 0,
            max_iterations,
            command_history: Vec::new(),
        }
    }

    /// Record one step's command and outcome.
    pub fn record(&mut self, command: &str, output: &str, error: Option<String>) {
        self.command_history.push(CommandRecord {
            command: command.to_string(),
            output: output.to_string(),
            error,
            timestamp: Utc::now(),
        });
        self.track_directory(command);
    }

    /// Record a command that was refused before execution. No directory
    /// tracking: nothing ran.
    pub fn record_blocked(&mut self, command: &str, reason: &str) {
        self.command_history.push(CommandRecord {
            command: command.to_string(),
            output: String::new(),
            error: Some(format!("blocked: {}", reason)),
            timestamp: Utc::now(),
        });
    }

    /// The last `n` records, for replanning context.
    pub fn recent_history(&self, n: usize) -> &[CommandRecord] {
        let start = self.command_history.len().saturating_sub(n);
        &self.command_history[start..]
    }

    /// Follow `cd` commands so later prompts carry the working directory.
    fn track_directory(&mut self, command: &str) {
        let tokens = match shell_words::split(command.trim()) {
            Ok(tokens) => tokens,
            Err(_) => return,
        };
        if tokens.first().map(String::as_str) != Some("cd") {
            return;
        }

        match tokens.get(1).map(String::as_str) {
            None | Some("~") => self.current_directory = "~".to_string(),
            Some("-") => {} // previous-directory shorthand is opaque to us
            Some("..") => {
                if let Some(pos) = self.current_directory.rfind('/') {
                    if pos > 0 {
                        self.current_directory.truncate(pos);
                    } else {
                        self.current_directory = "/".to_string();
                    }
                }
            }
            Some(target) if target.starts_with('/') => {
                self.current_directory = target.trim_end_matches('/').to_string();
                if self.current_directory.is_empty() {
                    self.current_directory = "/".to_string();
                }
            }
            Some(target) => {
                if self.current_directory == "/" {
                    self.current_directory = format!("/{}", target);
                } else {
                    self.current_directory =
                        format!("{}/{}", self.current_directory, target);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracks_absolute_cd() {
        let mut state = AgentState::new(10);
        state.record("cd /var/log", "", None);
        assert_eq!(state.current_directory, "/var/log");
    }

    #[test]
    fn test_tracks_relative_cd_and_parent() {
        let mut state = AgentState::new(10);
        state.record("cd /srv", "", None);
        state.record("cd app", "", None);
        assert_eq!(state.current_directory, "/srv/app");
        state.record("cd ..", "", None);
        assert_eq!(state.current_directory, "/srv");
    }

    #[test]
    fn test_quoted_directory_names() {
        let mut state = AgentState::new(10);
        state.record("cd /srv", "", None);
        state.record("cd \"my app\"", "", None);
        assert_eq!(state.current_directory, "/srv/my app");
    }

    #[test]
    fn test_bare_cd_goes_home() {
        let mut state = AgentState::new(10);
        state.record("cd /tmp", "", None);
        state.record("cd", "", None);
        assert_eq!(state.current_directory, "~");
    }

    #[test]
    fn test_non_cd_commands_leave_directory_alone() {
        let mut state = AgentState::new(10);
        state.record("cd /etc", "", None);
        state.record("ls -la", "files...", None);
        assert_eq!(state.current_directory, "/etc");
        assert_eq!(state.command_history.len(), 2);
    }

    #[test]
    fn test_recent_history_window() {
        let mut state = AgentState::new(10);
        for i in 0..8 {
            state.record(&format!("echo {}", i), "", None);
        }
        let recent = state.recent_history(5);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].command, "echo 3");
    }
}
