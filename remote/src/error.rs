use std::io;

use thiserror::Error;

/// Failures talking to a remote host.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to prepare local session files: {0}")]
    Workspace(#[source] io::Error),

    #[error("failed to establish SSH connection to {target}: {}", stderr_or(.stderr, "no diagnostics"))]
    Connect { target: String, stderr: String },

    #[error("host key verification failed for {target}: expected {expected}, found {}", found_or_none(.found))]
    HostKeyMismatch {
        target: String,
        expected: String,
        found: Vec<String>,
    },

    #[error("remote command `{command}` failed with {status}: {}", stderr_or(.stderr, "no output on stderr"))]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("unexpected output from `{command}`: {reason}")]
    UnexpectedOutput { command: String, reason: String },

    #[error("session to {0} is closed")]
    Closed(String),
}

fn stderr_or<'a>(stderr: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = stderr.trim();
    if trimmed.is_empty() { fallback } else { trimmed }
}

fn found_or_none(found: &[String]) -> String {
    if found.is_empty() {
        "no host keys".to_string()
    } else {
        found.join(", ")
    }
}

impl RemoteError {
    pub fn unexpected(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnexpectedOutput {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Captured remote standard error, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Connect { stderr, .. } | Self::CommandFailed { stderr, .. } => {
                Some(stderr.trim()).filter(|s| !s.is_empty())
            }
            _ => None,
        }
    }
}
