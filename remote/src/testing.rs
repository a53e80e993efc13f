//! Scripted [`RemoteShell`] for exercising remote workflows without a host.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::RemoteError;
use crate::shell::{CommandOutput, RemoteShell};

#[derive(Clone, Debug)]
enum Reply {
    Ok(CommandOutput),
    Fail { status: String, stderr: String },
}

#[derive(Clone, Debug)]
struct Rule {
    prefix: String,
    reply: Reply,
    persistent: bool,
}

/// Answers commands from a script of prefix rules and records every
/// command it receives.
///
/// One-shot rules are consumed in the order they were added; persistent
/// rules answer forever. Unmatched commands fail with status 127.
#[derive(Debug, Default)]
pub struct ScriptedShell {
    rules: VecDeque<Rule>,
    pub commands: Vec<String>,
    pub closed: bool,
    pub fail_close: bool,
}

impl ScriptedShell {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, prefix: &str, reply: Reply, persistent: bool) -> Self {
        self.rules.push_back(Rule {
            prefix: prefix.to_string(),
            reply,
            persistent,
        });
        self
    }

    /// Answers the next command starting with `prefix` once.
    pub fn on(self, prefix: &str, stdout: &str) -> Self {
        self.push(prefix, Reply::Ok(CommandOutput::new(stdout)), false)
    }

    /// Answers every command starting with `prefix`.
    pub fn always(self, prefix: &str, stdout: &str) -> Self {
        self.push(prefix, Reply::Ok(CommandOutput::new(stdout)), true)
    }

    /// Fails the next command starting with `prefix` once.
    pub fn fail(self, prefix: &str, stderr: &str) -> Self {
        self.push(
            prefix,
            Reply::Fail {
                status: "exit status: 1".to_string(),
                stderr: stderr.to_string(),
            },
            false,
        )
    }

    /// Commands that mutate remote state: everything run through `sudo`
    /// except privileged reads with `sudo cat`.
    pub fn mutations(&self) -> Vec<&str> {
        self.commands
            .iter()
            .map(String::as_str)
            .filter(|c| c.starts_with("sudo ") && !c.starts_with("sudo cat "))
            .collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.commands.iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[async_trait]
impl RemoteShell for ScriptedShell {
    async fn run(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
        if self.closed {
            return Err(RemoteError::Closed("scripted".to_string()));
        }
        self.commands.push(command.to_string());

        let Some(idx) = self.rules.iter().position(|r| command.starts_with(&r.prefix)) else {
            return Err(RemoteError::CommandFailed {
                command: command.to_string(),
                status: "exit status: 127".to_string(),
                stderr: format!("sh: unscripted command: {command}"),
            });
        };

        let reply = if self.rules[idx].persistent {
            self.rules[idx].reply.clone()
        } else {
            match self.rules.remove(idx) {
                Some(rule) => rule.reply,
                None => unreachable!("index returned by position"),
            }
        };

        match reply {
            Reply::Ok(output) => Ok(output),
            Reply::Fail { status, stderr } => Err(RemoteError::CommandFailed {
                command: command.to_string(),
                status,
                stderr,
            }),
        }
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        self.closed = true;
        if self.fail_close {
            return Err(RemoteError::Closed("scripted".to_string()));
        }
        Ok(())
    }
}
