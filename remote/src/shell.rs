use async_trait::async_trait;

use crate::RemoteError;

/// Captured output of a remote command that exited successfully.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// A connected session able to execute commands on a remote host.
///
/// Commands run strictly one after another; a non-zero exit status is
/// reported as [`RemoteError::CommandFailed`] carrying the remote stderr.
#[async_trait]
pub trait RemoteShell: Send {
    async fn run(&mut self, command: &str) -> Result<CommandOutput, RemoteError>;

    async fn close(&mut self) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// Single-quotes `value` for a POSIX shell.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
