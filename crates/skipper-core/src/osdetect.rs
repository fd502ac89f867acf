//! Target-system detection.
//!
//! One active probe (`detect`) run through the injected command channel at
//! the start of a task, and a passive classifier (`OsType::infer_from_text`)
//! the loops use to re-derive context from prior output without another
//! round trip.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capabilities::CommandRunner;
use crate::error::AgentError;

/// Target operating-system family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    Linux,
    Darwin,
    Windows,
    #[default]
    Unknown,
}

impl OsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsType::Linux => "linux",
            OsType::Darwin => "darwin",
            OsType::Windows => "windows",
            OsType::Unknown => "unknown",
        }
    }

    /// Classify free text (typically prior command output) by pattern list.
    /// Returns `Unknown` when nothing matches.
    pub fn infer_from_text(text: &str) -> OsType {
        let lower = text.to_lowercase();
        const LINUX_MARKERS: &[&str] = &[
            "linux", "ubuntu", "debian", "centos", "fedora", "alpine", "red hat", "suse",
        ];
        const DARWIN_MARKERS: &[&str] = &["darwin", "macos", "mac os"];
        const WINDOWS_MARKERS: &[&str] = &["windows", "microsoft", "c:\\"];

        if LINUX_MARKERS.iter().any(|m| lower.contains(m)) {
            OsType::Linux
        } else if DARWIN_MARKERS.iter().any(|m| lower.contains(m)) {
            OsType::Darwin
        } else if WINDOWS_MARKERS.iter().any(|m| lower.contains(m)) {
            OsType::Windows
        } else {
            OsType::Unknown
        }
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probe the remote system and classify it.
///
/// Tries a Unix identification probe first, then a Windows-style probe.
/// Ambiguous or failed probes default to `Linux`. `NoTransport` is the
/// only error that propagates; anything else is treated as an ambiguous
/// probe.
pub async fn detect(runner: &dyn CommandRunner) -> Result<OsType, AgentError> {
    match runner.execute("uname -s").await {
        Ok(out) => {
            let os = OsType::infer_from_text(&out.output);
            if os != OsType::Unknown {
                return Ok(os);
            }
        }
        Err(AgentError::NoTransport) => return Err(AgentError::NoTransport),
        Err(e) => {
            tracing::debug!("uname probe failed: {}", e);
        }
    }

    match runner.execute("ver").await {
        Ok(out) if OsType::infer_from_text(&out.output) == OsType::Windows => Ok(OsType::Windows),
        Err(AgentError::NoTransport) => Err(AgentError::NoTransport),
        _ => Ok(OsType::Linux),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_linux() {
        assert_eq!(OsType::infer_from_text("Linux host 6.8.0 x86_64"), OsType::Linux);
        assert_eq!(OsType::infer_from_text("Ubuntu 24.04.1 LTS"), OsType::Linux);
    }

    #[test]
    fn test_infer_darwin() {
        assert_eq!(OsType::infer_from_text("Darwin Kernel Version 23.6.0"), OsType::Darwin);
    }

    #[test]
    fn test_infer_windows() {
        assert_eq!(
            OsType::infer_from_text("Microsoft Windows [Version 10.0.22631]"),
            OsType::Windows
        );
    }

    #[test]
    fn test_infer_unknown() {
        assert_eq!(OsType::infer_from_text("command not found"), OsType::Unknown);
        assert_eq!(OsType::infer_from_text(""), OsType::Unknown);
    }
}
