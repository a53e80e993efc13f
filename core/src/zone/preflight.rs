//! Network preflight checks run before touching a host.

use async_trait::async_trait;
use tracing::Span;
use zonewall_remote::probe::{self, PORT_KUBE_API, PORT_SSH, ProbeStatus};

use crate::error::{Error, Result};

/// Ports whose state is reported before bootstrapping.
pub const REPORT_PORTS: [u16; 5] = [PORT_SSH, 80, 443, 6443, PORT_KUBE_API];

#[async_trait]
pub trait PortProber: Send + Sync {
    async fn probe(&self, host: &str, port: u16) -> ProbeStatus;
}

/// Probes with a real TCP handshake.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpProber;

#[async_trait]
impl PortProber for TcpProber {
    async fn probe(&self, host: &str, port: u16) -> ProbeStatus {
        probe::probe_tcp(host, port).await
    }
}

/// An SSH server must answer.
pub async fn check_ssh<P: PortProber + ?Sized>(prober: &P, host: &str) -> Result<()> {
    match prober.probe(host, PORT_SSH).await {
        ProbeStatus::Open => Ok(()),
        status => Err(Error::Preflight { port: PORT_SSH, status }),
    }
}

/// The API server port may be unanswered but must not be dropped.
pub async fn check_kube_api<P: PortProber + ?Sized>(prober: &P, host: &str) -> Result<()> {
    match prober.probe(host, PORT_KUBE_API).await {
        ProbeStatus::Closed => Err(Error::Preflight {
            port: PORT_KUBE_API,
            status: ProbeStatus::Closed,
        }),
        _ => Ok(()),
    }
}

/// Probes [`REPORT_PORTS`] and logs their state. Never fails.
pub async fn port_report<P: PortProber + ?Sized>(prober: &P, host: &str, span: &Span) -> Vec<(u16, ProbeStatus)> {
    let mut report = Vec::with_capacity(REPORT_PORTS.len());
    for port in REPORT_PORTS {
        let status = prober.probe(host, port).await;
        tracing::info!(parent: span, host, port, %status, "preflight port {port:>4}/tcp is {status}");
        report.push((port, status));
    }
    report
}
