//! Hostname convergence.
//!
//! Renaming is two remote mutations: `hostnamectl` and an edit of
//! `/etc/hosts`. The [`HostnameCheckpoint`] remembers that the first one
//! happened so a retry after a failed edit resumes there.
//!
//! The replaced name is also kept on the host in [`MARKER_FILE`] until the
//! hosts file is edited, so a later invocation that finds the new name
//! already set still finishes the edit.

use tracing::Span;
use zonewall_remote::shell::quote;
use zonewall_remote::RemoteShell;

use crate::error::{Error, Result};

const READ_HOSTNAME: &str = "hostnamectl hostname";
const HOSTS_FILE: &str = "/etc/hosts";

pub const MARKER_DIR: &str = "/var/lib/zonewall";
pub const MARKER_FILE: &str = "/var/lib/zonewall/hostname.previous";
pub const READ_MARKER: &str = "cat /var/lib/zonewall/hostname.previous 2>/dev/null || true";
pub const CLEAR_MARKER: &str = "sudo rm -f /var/lib/zonewall/hostname.previous";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum HostnameCheckpoint {
    #[default]
    Pending,
    /// `hostnamectl` succeeded, `/etc/hosts` still names `previous`.
    Renamed { previous: String },
    Converged,
}

/// Escapes `value` for the pattern side of a sed `s/.../.../` expression.
fn sed_pattern(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '/' | '.' | '*' | '[' | ']' | '^' | '$') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Escapes `value` for the replacement side of a sed expression.
fn sed_replacement(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '/' | '&') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub fn rename_command(desired: &str) -> String {
    format!("sudo hostnamectl hostname {}", quote(desired))
}

pub fn hosts_edit_command(previous: &str, desired: &str) -> String {
    let expression = format!("s/{}/{}/g", sed_pattern(previous), sed_replacement(desired));
    format!("sudo sed -i {} {HOSTS_FILE}", quote(&expression))
}

pub fn record_previous_command(previous: &str) -> String {
    format!(
        "sudo mkdir -p {MARKER_DIR} && printf '%s' {} | sudo tee {MARKER_FILE} > /dev/null",
        quote(previous)
    )
}

/// Name left behind by an interrupted rename, if any.
async fn pending_previous<S: RemoteShell + ?Sized>(shell: &mut S, desired: &str) -> Result<Option<String>> {
    let output = shell.run(READ_MARKER).await?;
    let previous = output.trimmed();
    if previous.is_empty() || previous == desired {
        return Ok(None);
    }
    Ok(Some(previous.to_string()))
}

async fn edit_hosts<S: RemoteShell + ?Sized>(shell: &mut S, previous: &str, desired: &str) -> Result<()> {
    if previous.is_empty() || previous == desired {
        return Ok(());
    }
    match shell.run(&hosts_edit_command(previous, desired)).await {
        Ok(_) => Ok(()),
        Err(source) => Err(Error::PartialMutation {
            completed: format!("hostname set to {desired}"),
            pending: format!("replace {previous} in {HOSTS_FILE}"),
            source,
        }),
    }
}

/// Makes the host's name `desired`. Returns whether anything was changed.
pub async fn converge_hostname<S: RemoteShell + ?Sized>(
    shell: &mut S,
    desired: &str,
    checkpoint: &mut HostnameCheckpoint,
    span: &Span,
) -> Result<bool> {
    let current = shell.run(READ_HOSTNAME).await?.trimmed().to_string();

    let previous = match checkpoint.clone() {
        HostnameCheckpoint::Renamed { previous } => {
            tracing::info!(parent: span, %previous, desired, "resuming interrupted hostname change");
            if current != desired {
                shell.run(&rename_command(desired)).await?;
            }
            previous
        }
        HostnameCheckpoint::Pending | HostnameCheckpoint::Converged if current == desired => {
            match pending_previous(shell, desired).await? {
                Some(previous) => {
                    tracing::info!(parent: span, %previous, desired, "finishing hostname change left by an earlier run");
                    *checkpoint = HostnameCheckpoint::Renamed {
                        previous: previous.clone(),
                    };
                    previous
                }
                None => {
                    tracing::info!(parent: span, hostname = desired, "hostname already set");
                    *checkpoint = HostnameCheckpoint::Converged;
                    return Ok(false);
                }
            }
        }
        HostnameCheckpoint::Pending | HostnameCheckpoint::Converged => {
            tracing::info!(parent: span, %current, desired, "changing hostname");
            shell.run(&record_previous_command(&current)).await?;
            shell.run(&rename_command(desired)).await?;
            *checkpoint = HostnameCheckpoint::Renamed {
                previous: current.clone(),
            };
            current
        }
    };

    edit_hosts(shell, &previous, desired).await?;
    *checkpoint = HostnameCheckpoint::Converged;
    shell.run(CLEAR_MARKER).await?;
    Ok(true)
}

/// Whether `err` left the host half renamed.
pub fn is_partial(err: &Error) -> bool {
    matches!(err.root(), Error::PartialMutation { .. })
}
