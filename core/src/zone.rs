//! Staged, idempotent bootstrap of a zone's router host.
//!
//! Stages run strictly forward. Each one observes the host first and only
//! mutates what differs, so a whole run can be repeated safely. State that
//! cannot be observed remotely (an interrupted hostname change) is carried
//! across attempts in [`BootstrapState`].

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::Span;
use zonewall_common::config::RetryConfig;
use zonewall_common::zone::{DnsProvider, Zone, ZoneConfig};
use zonewall_remote::fingerprint;
use zonewall_remote::probe::ProbeStatus;
use zonewall_remote::ssh::{SshConfig, SshSession, SshTarget};
use zonewall_remote::{RemoteError, RemoteShell};

use crate::error::{Error, Result};
use crate::retry::backoff_delay;

pub mod hostname;
pub mod network;
pub mod preflight;

pub use hostname::HostnameCheckpoint;
pub use network::WanStatus;
pub use preflight::{PortProber, TcpProber};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Validate,
    PreflightSsh,
    PreflightKubeApi,
    PortReport,
    Connect,
    Hostname,
    Loopback,
    Dhcp,
    Wan,
    Fingerprint,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::PreflightSsh => "preflight-ssh",
            Stage::PreflightKubeApi => "preflight-kube-api",
            Stage::PortReport => "port-report",
            Stage::Connect => "connect",
            Stage::Hostname => "hostname",
            Stage::Loopback => "loopback",
            Stage::Dhcp => "dhcp",
            Stage::Wan => "wan",
            Stage::Fingerprint => "fingerprint",
        }
    }

    fn wrap(self, err: impl Into<Error>) -> Error {
        Error::stage(self.as_str(), err)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress that survives between attempts of the same bootstrap.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BootstrapState {
    pub hostname: HostnameCheckpoint,
    pub attempts: u32,
}

/// Opens remote sessions to the host being bootstrapped.
#[async_trait]
pub trait ShellConnector: Send + Sync {
    type Shell: RemoteShell;

    async fn open(&self, host: &str) -> std::result::Result<Self::Shell, RemoteError>;

    async fn host_fingerprint(&self, host: &str) -> std::result::Result<String, RemoteError>;
}

/// Connects with the system SSH client and the operator's own identity.
#[derive(Clone, Debug, Default)]
pub struct SshConnector {
    pub user: Option<String>,
    pub identity_file: Option<PathBuf>,
}

#[async_trait]
impl ShellConnector for SshConnector {
    type Shell = SshSession;

    async fn open(&self, host: &str) -> std::result::Result<SshSession, RemoteError> {
        let mut target = SshTarget::new(host);
        target.user = self.user.clone();
        target.identity_file = self.identity_file.clone();
        SshSession::connect(&SshConfig::direct(target)).await
    }

    async fn host_fingerprint(&self, host: &str) -> std::result::Result<String, RemoteError> {
        fingerprint::probe_host_fingerprint(host).await
    }
}

/// Outcome of a successful bootstrap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoneReport {
    pub host: String,
    pub zone: Zone,
    pub ports: Vec<(u16, ProbeStatus)>,
    pub hostname_changed: bool,
    pub loopback_changed: bool,
    pub dhcp_changed: bool,
    pub wan: WanStatus,
    pub fingerprint: String,
}

struct Converged {
    hostname_changed: bool,
    loopback_changed: bool,
    dhcp_changed: bool,
    wan: WanStatus,
}

pub struct ZonePipeline<P, C> {
    prober: P,
    connector: C,
    span: Span,
}

impl<P: PortProber, C: ShellConnector> ZonePipeline<P, C> {
    pub fn new(prober: P, connector: C, span: Span) -> Self {
        Self {
            prober,
            connector,
            span,
        }
    }

    fn enter(&self, stage: Stage) {
        tracing::info!(parent: &self.span, stage = stage.as_str(), "stage started");
    }

    async fn converge(
        &self,
        shell: &mut C::Shell,
        zone: &Zone,
        state: &mut BootstrapState,
    ) -> Result<Converged> {
        self.enter(Stage::Hostname);
        let hostname_changed = hostname::converge_hostname(shell, &zone.router.hostname, &mut state.hostname, &self.span)
            .await
            .map_err(|e| Stage::Hostname.wrap(e))?;

        self.enter(Stage::Loopback);
        let loopback_changed = network::converge_loopback(shell, &zone.router, &self.span)
            .await
            .map_err(|e| Stage::Loopback.wrap(e))?;

        self.enter(Stage::Dhcp);
        let dhcp_changed = network::converge_dhcp(shell, &self.span)
            .await
            .map_err(|e| Stage::Dhcp.wrap(e))?;

        self.enter(Stage::Wan);
        let wan = network::converge_wan(shell, &self.span)
            .await
            .map_err(|e| Stage::Wan.wrap(e))?;

        Ok(Converged {
            hostname_changed,
            loopback_changed,
            dhcp_changed,
            wan,
        })
    }

    /// Runs every stage once against `host`.
    pub async fn up(
        &self,
        host: &str,
        config: &ZoneConfig,
        dns: &DnsProvider,
        state: &mut BootstrapState,
    ) -> Result<ZoneReport> {
        state.attempts += 1;

        self.enter(Stage::Validate);
        let zone = config.validate().map_err(|e| Stage::Validate.wrap(e))?;
        tracing::info!(
            parent: &self.span,
            zone = %zone.name,
            domain = %zone.domain,
            dns_provider = %dns.name,
            "bootstrapping zone"
        );

        self.enter(Stage::PreflightSsh);
        preflight::check_ssh(&self.prober, host)
            .await
            .map_err(|e| Stage::PreflightSsh.wrap(e))?;

        self.enter(Stage::PreflightKubeApi);
        preflight::check_kube_api(&self.prober, host)
            .await
            .map_err(|e| Stage::PreflightKubeApi.wrap(e))?;

        self.enter(Stage::PortReport);
        let ports = preflight::port_report(&self.prober, host, &self.span).await;

        self.enter(Stage::Connect);
        let mut shell = self
            .connector
            .open(host)
            .await
            .map_err(|e| Stage::Connect.wrap(e))?;

        let converged = self.converge(&mut shell, &zone, state).await;
        if let Err(err) = shell.close().await {
            tracing::warn!(parent: &self.span, host, error = %err, "failed to close session");
        }
        let converged = converged?;

        self.enter(Stage::Fingerprint);
        let fingerprint = self
            .connector
            .host_fingerprint(host)
            .await
            .map_err(|e| Stage::Fingerprint.wrap(e))?;
        tracing::info!(parent: &self.span, host, %fingerprint, "host key fingerprint");

        Ok(ZoneReport {
            host: host.to_string(),
            zone,
            ports,
            hostname_changed: converged.hostname_changed,
            loopback_changed: converged.loopback_changed,
            dhcp_changed: converged.dhcp_changed,
            wan: converged.wan,
            fingerprint,
        })
    }

    /// Repeats [`up`](Self::up) with backoff until it succeeds, fails
    /// permanently or the attempts in `retry` are used up.
    pub async fn up_with_retries(
        &self,
        host: &str,
        config: &ZoneConfig,
        dns: &DnsProvider,
        retry: &RetryConfig,
    ) -> Result<ZoneReport> {
        let mut state = BootstrapState::default();
        loop {
            match self.up(host, config, dns, &mut state).await {
                Ok(report) => return Ok(report),
                Err(err) if !err.is_retryable() || retry.exhausted(state.attempts) => return Err(err),
                Err(err) => {
                    let delay = backoff_delay(retry, state.attempts);
                    tracing::warn!(
                        parent: &self.span,
                        host,
                        attempt = state.attempts,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "bootstrap failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
