//! Protocol-polymorphic management clients.
//!
//! A [`ManagementSession`] is built per reconcile from a [`Host`] record and
//! its credential bundle, connected, queried and disconnected again. Sessions
//! are never pooled.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::Span;
use zonewall_common::host::{Host, PROTOCOL_SSH};
use zonewall_common::os::OsInfo;

use crate::error::{Error, Result};
use crate::store::ResourceStore;

pub mod ssh;

pub use ssh::SshManagementClient;

#[async_trait]
pub trait ManagementClient: Send {
    /// Opens the transport and probes the operating system.
    async fn connect(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    /// Operating system observed by the last successful [`connect`].
    ///
    /// [`connect`]: ManagementClient::connect
    fn current_os(&self) -> Option<&OsInfo>;
}

/// Supported management transports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Ssh,
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        match tag {
            PROTOCOL_SSH => Ok(Protocol::Ssh),
            other => Err(Error::UnknownProtocol(other.to_string())),
        }
    }
}

/// A management client of any supported protocol.
pub enum ManagementSession {
    Ssh(SshManagementClient),
}

#[async_trait]
impl ManagementClient for ManagementSession {
    async fn connect(&mut self) -> Result<()> {
        match self {
            ManagementSession::Ssh(client) => client.connect().await,
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        match self {
            ManagementSession::Ssh(client) => client.disconnect().await,
        }
    }

    fn current_os(&self) -> Option<&OsInfo> {
        match self {
            ManagementSession::Ssh(client) => client.current_os(),
        }
    }
}

/// Builds unconnected management clients for hosts.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    type Client: ManagementClient;

    async fn build(&self, host: &Host) -> Result<Self::Client>;
}

/// Builds clients from the store's credential bundles.
pub struct Registry<S> {
    store: Arc<S>,
    span: Span,
}

impl<S: ResourceStore> Registry<S> {
    pub fn new(store: Arc<S>, span: Span) -> Self {
        Self { store, span }
    }
}

#[async_trait]
impl<S: ResourceStore + 'static> ClientFactory for Registry<S> {
    type Client = ManagementSession;

    async fn build(&self, host: &Host) -> Result<ManagementSession> {
        let protocol: Protocol = host.spec.protocol.parse()?;

        let secret_key = host.secret_key();
        let secret = self
            .store
            .get_secret(&secret_key)
            .await
            .ok_or(Error::SecretNotFound(secret_key))?;

        tracing::debug!(
            parent: &self.span,
            host = %host.metadata.key(),
            ?protocol,
            "building management client"
        );
        match protocol {
            Protocol::Ssh => Ok(ManagementSession::Ssh(SshManagementClient::from_host(
                host, &secret,
            ))),
        }
    }
}
