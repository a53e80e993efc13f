//! TCP reachability classification.
//!
//! A probe is a plain TCP handshake. Its outcome is folded into three
//! states: a completed handshake is `open`, a handshake that never finished
//! within the budget is `closed`, and any other failure (refused, no route,
//! unresolvable name) is `filtered`.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::timeout;

pub const PORT_SSH: u16 = 22;
pub const PORT_KUBE_API: u16 = 7443;

/// Fixed budget of a single probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Open,
    Closed,
    Filtered,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Open => "open",
            ProbeStatus::Closed => "closed",
            ProbeStatus::Filtered => "filtered",
        }
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub async fn probe_tcp(host: &str, port: u16) -> ProbeStatus {
    probe_tcp_with_timeout(host, port, PROBE_TIMEOUT).await
}

pub async fn probe_tcp_with_timeout(host: &str, port: u16, budget: Duration) -> ProbeStatus {
    let status = match timeout(budget, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => ProbeStatus::Open,
        Ok(Err(err)) => {
            tracing::debug!(host, port, error = %err, "probe failed");
            ProbeStatus::Filtered
        }
        Err(_elapsed) => ProbeStatus::Closed,
    };
    tracing::trace!(host, port, %status, "probe finished");
    status
}

/// Probes every port concurrently. Results keep the order of `ports`.
pub async fn probe_ports(host: &str, ports: &[u16]) -> Vec<(u16, ProbeStatus)> {
    let mut set: JoinSet<(usize, u16, ProbeStatus)> = JoinSet::new();
    for (idx, &port) in ports.iter().enumerate() {
        let host = host.to_string();
        set.spawn(async move { (idx, port, probe_tcp(&host, port).await) });
    }

    let mut results: Vec<Option<(u16, ProbeStatus)>> = vec![None; ports.len()];
    while let Some(joined) = set.join_next().await {
        if let Ok((idx, port, status)) = joined {
            results[idx] = Some((port, status));
        }
    }

    results
        .into_iter()
        .zip(ports)
        .map(|(result, &port)| result.unwrap_or((port, ProbeStatus::Filtered)))
        .collect()
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
