//! SSH host key fingerprints.
//!
//! Fingerprints use the OpenSSH `SHA256:<base64>` notation: the SHA-256
//! digest of the wire-format public key, base64 encoded without padding.

use std::process::Stdio;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tokio::task::JoinSet;

use crate::RemoteError;
use crate::probe::PORT_SSH;

/// Connect timeout handed to `ssh-keyscan`.
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// Preferred key types, best first.
const PREFERENCE: [&str; 3] = ["ssh-ed25519", "ecdsa-sha2-nistp256", "ssh-rsa"];

/// One public host key as found in `known_hosts` format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostKey {
    pub algorithm: String,
    pub blob: Vec<u8>,
    /// The original `known_hosts` line.
    pub line: String,
}

impl HostKey {
    pub fn fingerprint(&self) -> String {
        fingerprint_sha256(&self.blob)
    }

    pub fn matches(&self, expected: &str) -> bool {
        normalize(&self.fingerprint()) == normalize(expected)
    }
}

pub fn fingerprint_sha256(blob: &[u8]) -> String {
    format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(blob)))
}

fn normalize(fingerprint: &str) -> &str {
    fingerprint.trim().trim_end_matches('=')
}

/// Parses a `known_hosts` line. Comments, blank lines and lines whose key
/// does not decode yield `None`.
pub fn parse_key_line(line: &str) -> Option<HostKey> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut fields = line.split_whitespace().peekable();
    if fields.peek().is_some_and(|f| f.starts_with('@')) {
        fields.next();
    }
    let _hosts = fields.next()?;
    let algorithm = fields.next()?;
    let blob = STANDARD.decode(fields.next()?).ok()?;

    Some(HostKey {
        algorithm: algorithm.to_string(),
        blob,
        line: line.to_string(),
    })
}

pub fn parse_known_hosts(content: &str) -> Vec<HostKey> {
    content.lines().filter_map(parse_key_line).collect()
}

/// Keys in `keys` whose fingerprint equals `expected`.
pub fn select_matching<'a>(
    target: &str,
    keys: &'a [HostKey],
    expected: &str,
) -> Result<Vec<&'a HostKey>, RemoteError> {
    let matching: Vec<&HostKey> = keys.iter().filter(|k| k.matches(expected)).collect();
    if matching.is_empty() {
        return Err(RemoteError::HostKeyMismatch {
            target: target.to_string(),
            expected: expected.to_string(),
            found: keys.iter().map(HostKey::fingerprint).collect(),
        });
    }
    Ok(matching)
}

/// Fingerprint of the most preferred key type offered.
pub fn preferred(keys: &[HostKey]) -> Option<&HostKey> {
    PREFERENCE
        .iter()
        .find_map(|alg| keys.iter().find(|k| k.algorithm == *alg))
        .or_else(|| keys.first())
}

/// Condenses `ssh-keyscan` stderr, which repeats each diagnostic once per
/// key type, into its distinct lines. Banner comments are dropped.
fn scan_diagnostics(stderr: &str) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for line in stderr.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || seen.contains(&line) {
            continue;
        }
        seen.push(line);
    }
    if seen.is_empty() {
        return "no host keys offered".to_string();
    }
    seen.join("; ")
}

/// Collects the host keys offered by `host:port` with `ssh-keyscan`.
pub async fn scan_host_keys(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<Vec<HostKey>, RemoteError> {
    let output = Command::new("ssh-keyscan")
        .arg("-T")
        .arg(timeout.as_secs().max(1).to_string())
        .arg("-p")
        .arg(port.to_string())
        .arg(host)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| RemoteError::Spawn {
            program: "ssh-keyscan",
            source,
        })?;

    let keys = parse_known_hosts(&String::from_utf8_lossy(&output.stdout));
    if keys.is_empty() {
        return Err(RemoteError::Connect {
            target: format!("{host}:{port}"),
            stderr: scan_diagnostics(&String::from_utf8_lossy(&output.stderr)),
        });
    }
    tracing::debug!(host, port, count = keys.len(), "scanned host keys");
    Ok(keys)
}

pub async fn probe_host_fingerprint(host: &str) -> Result<String, RemoteError> {
    let keys = scan_host_keys(host, PORT_SSH, SCAN_TIMEOUT).await?;
    preferred(&keys)
        .map(HostKey::fingerprint)
        .ok_or_else(|| RemoteError::unexpected("ssh-keyscan", "no host keys offered"))
}

/// Fingerprints every host concurrently and waits for all of them.
///
/// A failure for one host becomes that host's row and never affects the
/// others. Rows keep the order of `hosts`.
pub async fn probe_host_fingerprints(hosts: &[String]) -> Vec<(String, Result<String, String>)> {
    let mut set = JoinSet::new();
    for (idx, host) in hosts.iter().enumerate() {
        let host = host.clone();
        set.spawn(async move {
            let result = probe_host_fingerprint(&host).await.map_err(|e| e.to_string());
            (idx, result)
        });
    }

    let mut rows: Vec<Result<String, String>> =
        vec![Err("fingerprint task did not complete".to_string()); hosts.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, result)) => rows[idx] = result,
            Err(err) => tracing::warn!(error = %err, "fingerprint task failed"),
        }
    }

    hosts.iter().cloned().zip(rows).collect()
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
